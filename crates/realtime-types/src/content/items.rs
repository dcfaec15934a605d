use crate::content::message::MessageItem;

/// A conversation item as created by the client.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Item {
    #[serde(rename = "message")]
    Message(MessageItem),
    #[serde(rename = "function_call")]
    FunctionCall(FunctionCallItem),
    #[serde(rename = "function_call_output")]
    FunctionCallOutput(FunctionCallOutputItem),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "incomplete")]
    Incomplete,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct ItemHeader {
    /// Optional for client events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallItem {
    #[serde(flatten)]
    header: ItemHeader,
    call_id: String,
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

impl FunctionCallItem {
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

/// The result of a function call, fed back into the conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCallOutputItem {
    #[serde(flatten)]
    header: ItemHeader,
    call_id: String,
    output: String,
}

impl FunctionCallOutputItem {
    pub fn new(call_id: &str, output: &str) -> Self {
        Self {
            header: ItemHeader::default(),
            call_id: call_id.to_string(),
            output: output.to_string(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

impl Item {
    pub fn function_output(call_id: &str, output: &str) -> Self {
        Item::FunctionCallOutput(FunctionCallOutputItem::new(call_id, output))
    }
}
