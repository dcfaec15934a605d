/// A content part as reported by the server inside response output and
/// `response.content_part.*` events.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "audio")]
    Audio {
        #[serde(default)]
        transcript: Option<String>,
    },
    #[serde(rename = "input_text")]
    InputText {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "input_audio")]
    InputAudio {
        #[serde(default)]
        transcript: Option<String>,
    },
}

impl ContentPart {
    /// Spoken or written text carried by this part, if any.
    pub fn transcript(&self) -> Option<&str> {
        let text = match self {
            ContentPart::Text { text } | ContentPart::InputText { text } => Some(text.as_str()),
            ContentPart::Audio { transcript } | ContentPart::InputAudio { transcript } => {
                transcript.as_deref()
            }
        };
        text.filter(|t| !t.is_empty())
    }
}
