#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorDetails {
    #[serde(rename = "type", default)]
    error_type: String,
    code: Option<String>,
    #[serde(default)]
    message: String,
    param: Option<String>,
    event_id: Option<String>,
}

impl ErrorDetails {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error_type: error_type.to_string(),
            code: None,
            message: message.to_string(),
            param: None,
            event_id: None,
        }
    }

    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The client event that caused the error, if the server attributed it.
    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }
}
