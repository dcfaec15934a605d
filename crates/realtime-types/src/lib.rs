//! Wire types for the realtime speech-to-speech model API.
//!
//! Client events are what this system sends on the model socket, server
//! events are what it receives. Everything serializes to the JSON shape the
//! model expects, tagged by the `type` field.

pub mod audio;
pub mod events;
pub mod session;
pub mod tools;
mod content;

pub use content::items::{FunctionCallItem, FunctionCallOutputItem, Item};
pub use content::message::*;
pub use content::parts::ContentPart;
pub use events::{ClientEvent, ServerEvent};
pub use session::{ResponseConfig, Session};
