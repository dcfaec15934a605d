mod consts;
mod transcription;
mod turn_detection;

pub use consts::*;
pub use transcription::InputAudioTranscription;
pub use turn_detection::{ServerVadTurnDetection, TurnDetection};

/// Audio payload as carried on the wire, already base64 encoded.
pub type Base64EncodedAudioBytes = String;
