//! Call handling for a phone line answered by a realtime speech model.
//!
//! The pieces here are transport agnostic: [`relay::CallRelay`] decides what
//! should happen for every input of a call and hands back [`relay::Command`]s,
//! and the server binary owns the sockets that carry them out.

pub mod backend;
pub mod dispatch;
pub mod intake;
pub mod relay;
pub mod session;
pub mod telephony;
pub mod tools;

pub use backend::{Backend, BackendError, WebhookClient};
pub use relay::{CallRelay, Command, Input, RelaySettings, RelayState};
pub use session::{SessionRecord, SessionStore, Speaker, Transcript};
