pub(crate) mod items;
pub(crate) mod message;
pub(crate) mod parts;
