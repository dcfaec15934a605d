use crate::Item;
use crate::audio::Base64EncodedAudioBytes;
use crate::session::{ResponseConfig, Session};

/// `session.update` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    session: Session,
}

impl SessionUpdateEvent {
    pub fn new(session: Session) -> Self {
        Self {
            event_id: None,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// `input_audio_buffer.append` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferAppendEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    audio: Base64EncodedAudioBytes,
}

impl InputAudioBufferAppendEvent {
    pub fn new(audio: Base64EncodedAudioBytes) -> Self {
        Self {
            event_id: None,
            audio,
        }
    }

    pub fn audio(&self) -> &Base64EncodedAudioBytes {
        &self.audio
    }
}

/// `conversation.item.create` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The ID of the preceding item after which the new item will be inserted
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_item_id: Option<String>,

    item: Item,
}

impl ConversationItemCreateEvent {
    pub fn new(item: Item) -> Self {
        Self {
            event_id: None,
            previous_item_id: None,
            item,
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// `response.create` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ResponseConfig>,
}

impl ResponseCreateEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, response: ResponseConfig) -> Self {
        self.response = Some(response);
        self
    }

    pub fn response(&self) -> Option<&ResponseConfig> {
        self.response.as_ref()
    }
}

/// `response.cancel` event
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseCancelEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl ResponseCancelEvent {
    pub fn new() -> Self {
        Self::default()
    }
}
