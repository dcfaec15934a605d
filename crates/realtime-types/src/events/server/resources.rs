use crate::{ContentPart, MessageRole};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseResource {
    #[serde(default)]
    id: String,

    /// "in_progress", "completed", "cancelled", "failed" or "incomplete"
    #[serde(default)]
    status: String,

    #[serde(default)]
    output: Vec<ItemResource>,

    usage: Option<Usage>,
}

impl ResponseResource {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn output(&self) -> &[ItemResource] {
        &self.output
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// First non-empty transcript or text found while walking the output
    /// items and their content parts in order.
    pub fn first_transcript(&self) -> Option<&str> {
        self.output.iter().find_map(|item| match item {
            ItemResource::Message { content, .. } => {
                content.iter().find_map(ContentPart::transcript)
            }
            _ => None,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ItemResource {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        id: String,
        role: MessageRole,
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        #[serde(default)]
        id: String,
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput {
        #[serde(default)]
        id: String,
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        output: String,
    },
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    #[serde(default)]
    total_tokens: u32,
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.total_tokens
    }

    pub fn input_tokens(&self) -> u32 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u32 {
        self.output_tokens
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RateLimitInformation {
    name: String,
    limit: u64,
    remaining: u64,
    reset_seconds: f64,
}

impl RateLimitInformation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}
