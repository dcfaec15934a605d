use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Operation selector understood by the business backend's webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    FetchGreeting,
    PersistTranscript,
    AnswerQuestion,
    BookTow,
    LogComplaint,
}

#[derive(Debug, Serialize)]
pub struct WebhookRequest<'a> {
    pub route: Route,
    pub data1: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data2: Option<&'a str>,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook answered {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub answer: String,
    /// Conversation handle to pass back with the next question, when the
    /// backend issued one.
    pub thread_id: Option<String>,
}

/// The business backend as seen by a call. Every method maps to one webhook
/// route; callers decide the fallback on error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Personalised greeting for the caller, `None` when the backend has none.
    async fn fetch_greeting(&self, caller: &str) -> Result<Option<String>, BackendError>;

    async fn answer_question(
        &self,
        question: &str,
        thread_id: Option<String>,
    ) -> Result<Answer, BackendError>;

    /// Returns the booking status message to read to the caller.
    async fn book_tow(&self, caller: &str, address: &str) -> Result<String, BackendError>;

    async fn log_complaint(&self, caller: &str, complaint: &str) -> Result<(), BackendError>;

    async fn persist_transcript(&self, caller: &str, transcript: &str)
    -> Result<(), BackendError>;
}

/// [`Backend`] over a single HTTP webhook taking `{route, data1, data2}`.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
}

impl WebhookClient {
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts the request and returns the raw body of a successful response.
    pub async fn post(&self, request: &WebhookRequest<'_>) -> Result<String, BackendError> {
        tracing::debug!(route = ?request.route, "calling webhook");
        let response = self.http.post(&self.url).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Backend for WebhookClient {
    async fn fetch_greeting(&self, caller: &str) -> Result<Option<String>, BackendError> {
        let body = self
            .post(&WebhookRequest {
                route: Route::FetchGreeting,
                data1: caller,
                data2: None,
            })
            .await?;
        Ok(parse_greeting(&body))
    }

    async fn answer_question(
        &self,
        question: &str,
        thread_id: Option<String>,
    ) -> Result<Answer, BackendError> {
        let body = self
            .post(&WebhookRequest {
                route: Route::AnswerQuestion,
                data1: question,
                data2: thread_id.as_deref(),
            })
            .await?;
        Ok(parse_answer(&body))
    }

    async fn book_tow(&self, caller: &str, address: &str) -> Result<String, BackendError> {
        let body = self
            .post(&WebhookRequest {
                route: Route::BookTow,
                data1: caller,
                data2: Some(address),
            })
            .await?;
        Ok(parse_booking(&body))
    }

    async fn log_complaint(&self, caller: &str, complaint: &str) -> Result<(), BackendError> {
        self.post(&WebhookRequest {
            route: Route::LogComplaint,
            data1: caller,
            data2: Some(complaint),
        })
        .await?;
        Ok(())
    }

    async fn persist_transcript(
        &self,
        caller: &str,
        transcript: &str,
    ) -> Result<(), BackendError> {
        self.post(&WebhookRequest {
            route: Route::PersistTranscript,
            data1: transcript,
            data2: Some(caller),
        })
        .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct GreetingBody {
    greeting: Option<String>,
}

#[derive(Deserialize)]
struct AnswerBody {
    #[serde(alias = "output")]
    answer: Option<String>,
    #[serde(rename = "threadId", alias = "thread_id")]
    thread_id: Option<String>,
}

#[derive(Deserialize)]
struct BookingBody {
    #[serde(alias = "status")]
    message: Option<String>,
}

fn non_blank(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Accepts `{"greeting": ..}` or the greeting as plain text.
pub fn parse_greeting(body: &str) -> Option<String> {
    match serde_json::from_str::<GreetingBody>(body) {
        Ok(parsed) => parsed.greeting.as_deref().and_then(non_blank),
        Err(_) => non_blank(body),
    }
}

/// Accepts `{"answer"|"output": .., "threadId"|"thread_id": ..}` or the answer
/// as plain text.
pub fn parse_answer(body: &str) -> Answer {
    match serde_json::from_str::<AnswerBody>(body) {
        Ok(AnswerBody {
            answer: Some(answer),
            thread_id,
        }) => Answer {
            answer,
            thread_id: thread_id.as_deref().and_then(non_blank),
        },
        _ => Answer {
            answer: body.trim().to_string(),
            thread_id: None,
        },
    }
}

/// Accepts `{"message"|"status": ..}` or the status as plain text.
pub fn parse_booking(body: &str) -> String {
    match serde_json::from_str::<BookingBody>(body) {
        Ok(BookingBody {
            message: Some(message),
        }) => message,
        _ => body.trim().to_string(),
    }
}
