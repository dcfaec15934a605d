pub mod client;
pub mod server;

use client::*;
use server::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateEvent),
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend(InputAudioBufferAppendEvent),
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate(ConversationItemCreateEvent),
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateEvent),
    #[serde(rename = "response.cancel")]
    ResponseCancel(ResponseCancelEvent),
}

impl ClientEvent {
    /// The wire `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate(_) => "session.update",
            ClientEvent::InputAudioBufferAppend(_) => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate(_) => "conversation.item.create",
            ClientEvent::ResponseCreate(_) => "response.create",
            ClientEvent::ResponseCancel(_) => "response.cancel",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Synthesized locally when the socket closes; never sent by the server.
    #[serde(rename = "close")]
    Close { reason: Option<String> },
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "session.created")]
    SessionCreated(SessionEvent),
    #[serde(rename = "session.updated")]
    SessionUpdated(SessionEvent),
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted(InputAudioBufferCommittedEvent),
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted(InputAudioBufferSpeechStartedEvent),
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped(InputAudioBufferSpeechStoppedEvent),
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated(ConversationItemCreatedEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    ConversationItemInputAudioTranscriptionCompleted(
        ConversationItemInputAudioTranscriptionCompletedEvent,
    ),
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    ConversationItemInputAudioTranscriptionFailed(
        ConversationItemInputAudioTranscriptionFailedEvent,
    ),
    #[serde(rename = "response.created")]
    ResponseCreated(ResponseEvent),
    #[serde(rename = "response.done")]
    ResponseDone(ResponseEvent),
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded(ResponseOutputItemEvent),
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone(ResponseOutputItemEvent),
    #[serde(rename = "response.content_part.added")]
    ResponseContentPartAdded(ResponseContentPartEvent),
    #[serde(rename = "response.content_part.done")]
    ResponseContentPartDone(ResponseContentPartEvent),
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta(ResponseDeltaEvent),
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone(ResponseAudioTranscriptDoneEvent),
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta(ResponseDeltaEvent),
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone(ResponseAudioDoneEvent),
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta(ResponseDeltaEvent),
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone(ResponseFunctionCallArgumentsDoneEvent),
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated(RateLimitsUpdatedEvent),
}

impl ServerEvent {
    /// The wire `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Close { .. } => "close",
            ServerEvent::Error(_) => "error",
            ServerEvent::SessionCreated(_) => "session.created",
            ServerEvent::SessionUpdated(_) => "session.updated",
            ServerEvent::InputAudioBufferCommitted(_) => "input_audio_buffer.committed",
            ServerEvent::InputAudioBufferSpeechStarted(_) => "input_audio_buffer.speech_started",
            ServerEvent::InputAudioBufferSpeechStopped(_) => "input_audio_buffer.speech_stopped",
            ServerEvent::ConversationItemCreated(_) => "conversation.item.created",
            ServerEvent::ConversationItemInputAudioTranscriptionCompleted(_) => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::ConversationItemInputAudioTranscriptionFailed(_) => {
                "conversation.item.input_audio_transcription.failed"
            }
            ServerEvent::ResponseCreated(_) => "response.created",
            ServerEvent::ResponseDone(_) => "response.done",
            ServerEvent::ResponseOutputItemAdded(_) => "response.output_item.added",
            ServerEvent::ResponseOutputItemDone(_) => "response.output_item.done",
            ServerEvent::ResponseContentPartAdded(_) => "response.content_part.added",
            ServerEvent::ResponseContentPartDone(_) => "response.content_part.done",
            ServerEvent::ResponseAudioTranscriptDelta(_) => "response.audio_transcript.delta",
            ServerEvent::ResponseAudioTranscriptDone(_) => "response.audio_transcript.done",
            ServerEvent::ResponseAudioDelta(_) => "response.audio.delta",
            ServerEvent::ResponseAudioDone(_) => "response.audio.done",
            ServerEvent::ResponseFunctionCallArgumentsDelta(_) => {
                "response.function_call_arguments.delta"
            }
            ServerEvent::ResponseFunctionCallArgumentsDone(_) => {
                "response.function_call_arguments.done"
            }
            ServerEvent::RateLimitsUpdated(_) => "rate_limits.updated",
        }
    }
}
