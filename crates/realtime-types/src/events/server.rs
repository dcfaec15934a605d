mod error;
mod resources;

pub use error::ErrorDetails;
pub use resources::*;

use crate::ContentPart;

/// `error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    #[serde(default)]
    event_id: String,

    error: ErrorDetails,
}

impl ErrorEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `session.created` and `session.updated` events. The session resource is
/// only logged, so it stays untyped.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionEvent {
    #[serde(default)]
    event_id: String,

    session: serde_json::Value,
}

impl SessionEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session(&self) -> &serde_json::Value {
        &self.session
    }
}

/// `input_audio_buffer.committed` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommittedEvent {
    #[serde(default)]
    event_id: String,

    previous_item_id: Option<String>,

    /// The ID of the user message item that will be created
    item_id: String,
}

impl InputAudioBufferCommittedEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `input_audio_buffer.speech_started` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferSpeechStartedEvent {
    #[serde(default)]
    event_id: String,

    /// Milliseconds since the session started when speech was detected
    #[serde(default)]
    audio_start_ms: u64,

    #[serde(default)]
    item_id: String,
}

impl InputAudioBufferSpeechStartedEvent {
    pub fn audio_start_ms(&self) -> u64 {
        self.audio_start_ms
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `input_audio_buffer.speech_stopped` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferSpeechStoppedEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    audio_end_ms: u64,

    #[serde(default)]
    item_id: String,
}

impl InputAudioBufferSpeechStoppedEvent {
    pub fn audio_end_ms(&self) -> u64 {
        self.audio_end_ms
    }
}

/// `conversation.item.created` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreatedEvent {
    #[serde(default)]
    event_id: String,

    previous_item_id: Option<String>,

    item: ItemResource,
}

impl ConversationItemCreatedEvent {
    pub fn item(&self) -> &ItemResource {
        &self.item
    }
}

/// `conversation.item.input_audio_transcription.completed` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemInputAudioTranscriptionCompletedEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    content_index: u32,

    transcript: String,
}

impl ConversationItemInputAudioTranscriptionCompletedEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// `conversation.item.input_audio_transcription.failed` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemInputAudioTranscriptionFailedEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    content_index: u32,

    error: ErrorDetails,
}

impl ConversationItemInputAudioTranscriptionFailedEvent {
    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `response.created` and `response.done` events
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseEvent {
    #[serde(default)]
    event_id: String,

    response: ResponseResource,
}

impl ResponseEvent {
    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

/// `response.output_item.added` and `response.output_item.done` events
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseOutputItemEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    output_index: u32,

    item: ItemResource,
}

impl ResponseOutputItemEvent {
    pub fn item(&self) -> &ItemResource {
        &self.item
    }
}

/// `response.content_part.added` and `response.content_part.done` events
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseContentPartEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: u32,

    #[serde(default)]
    content_index: u32,

    part: ContentPart,
}

impl ResponseContentPartEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn part(&self) -> &ContentPart {
        &self.part
    }
}

/// Streaming delta shared by `response.audio.delta`,
/// `response.audio_transcript.delta` and `response.function_call_arguments.delta`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseDeltaEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: u32,

    #[serde(default)]
    content_index: u32,

    /// Only set on function call argument deltas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_id: Option<String>,

    delta: String,
}

impl ResponseDeltaEvent {
    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }
}

/// `response.audio_transcript.done` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseAudioTranscriptDoneEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: u32,

    #[serde(default)]
    content_index: u32,

    transcript: String,
}

impl ResponseAudioTranscriptDoneEvent {
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// `response.audio.done` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseAudioDoneEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    item_id: String,
}

impl ResponseAudioDoneEvent {
    pub fn response_id(&self) -> &str {
        &self.response_id
    }
}

/// `response.function_call_arguments.done` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseFunctionCallArgumentsDoneEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    response_id: String,

    #[serde(default)]
    item_id: String,

    #[serde(default)]
    output_index: u32,

    call_id: String,

    /// Name of the function the model wants to call
    name: String,

    /// The completed arguments, a JSON-encoded object
    arguments: String,
}

impl ResponseFunctionCallArgumentsDoneEvent {
    pub fn new(call_id: &str, name: &str, arguments: &str) -> Self {
        Self {
            event_id: String::new(),
            response_id: String::new(),
            item_id: String::new(),
            output_index: 0,
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }
}

/// `rate_limits.updated` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RateLimitsUpdatedEvent {
    #[serde(default)]
    event_id: String,

    #[serde(default)]
    rate_limits: Vec<RateLimitInformation>,
}

impl RateLimitsUpdatedEvent {
    pub fn rate_limits(&self) -> &[RateLimitInformation] {
        &self.rate_limits
    }
}
