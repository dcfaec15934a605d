use crate::audio::Base64EncodedAudioBytes;
use crate::content::items::ItemHeader;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageItem {
    #[serde(flatten)]
    header: ItemHeader,

    role: MessageRole,

    content: Vec<Content>,
}

impl MessageItem {
    pub fn builder() -> MessageItemBuilder {
        MessageItemBuilder::new()
    }

    pub fn id(&self) -> Option<&str> {
        self.header.id.as_deref()
    }

    pub fn role(&self) -> MessageRole {
        self.role.clone()
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }
}

pub struct MessageItemBuilder {
    item: MessageItem,
}

impl Default for MessageItemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageItemBuilder {
    pub fn new() -> Self {
        Self {
            item: MessageItem {
                header: ItemHeader::default(),
                role: MessageRole::User,
                content: Vec::new(),
            },
        }
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.item.role = role;
        self
    }

    pub fn with_input_text(mut self, text: &str) -> Self {
        self.item.content.push(Content::input_text(text));
        self
    }

    pub fn with_input_audio(mut self, audio: Base64EncodedAudioBytes) -> Self {
        self.item.content.push(Content::InputAudio(InputAudioContent { audio }));
        self
    }

    pub fn build(self) -> MessageItem {
        self.item
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "input_text")]
    InputText(InputTextContent),
    #[serde(rename = "input_audio")]
    InputAudio(InputAudioContent),
}

impl Content {
    pub fn input_text(text: &str) -> Self {
        Content::InputText(InputTextContent {
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Content::InputText(c) => Some(&c.text),
            Content::InputAudio(_) => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct InputTextContent {
    text: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct InputAudioContent {
    audio: Base64EncodedAudioBytes,
}
