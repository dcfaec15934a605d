use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Caller number used when the telephony layer did not send one.
pub const UNKNOWN_CALLER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Agent,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::User => "User",
            Speaker::Agent => "Agent",
        }
    }
}

/// Ordered lines of the conversation, in the order their events arrived.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<(Speaker, String)>,
}

impl Transcript {
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.lines.push((speaker, text.into()));
    }

    pub fn lines(&self) -> &[(Speaker, String)] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (speaker, text) in &self.lines {
            writeln!(f, "{}: {}", speaker.label(), text)?;
        }
        Ok(())
    }
}

/// Call-setup fields posted by the telephony provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallSetup {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

impl CallSetup {
    /// The caller's number, or [`UNKNOWN_CALLER`] when absent or blank.
    pub fn caller(&self) -> &str {
        self.from
            .as_deref()
            .map(str::trim)
            .filter(|from| !from.is_empty())
            .unwrap_or(UNKNOWN_CALLER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub call_id: String,
    pub caller: String,
    pub greeting: String,
    pub setup: Option<CallSetup>,
    pub stream_id: Option<String>,
    pub transcript: Transcript,
    pub thread_id: Option<String>,
}

impl SessionRecord {
    pub fn new(call_id: &str, caller: &str, greeting: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            caller: caller.to_string(),
            greeting: greeting.to_string(),
            setup: None,
            stream_id: None,
            transcript: Transcript::default(),
            thread_id: None,
        }
    }

    pub fn with_setup(mut self, setup: CallSetup) -> Self {
        self.setup = Some(setup);
        self
    }
}

/// In-memory map from call id to its [`SessionRecord`]. Cloning shares the map.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionRecord>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the record, replacing any stale one for the same call. Returns
    /// true when a record was replaced.
    pub async fn create(&self, record: SessionRecord) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(record.call_id.clone(), record).is_some()
    }

    pub async fn get(&self, call_id: &str) -> Option<SessionRecord> {
        self.sessions.lock().await.get(call_id).cloned()
    }

    pub async fn contains(&self, call_id: &str) -> bool {
        self.sessions.lock().await.contains_key(call_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Records the stream id on the call's session. A call that skipped
    /// intake gets a fresh record built from the stream parameters.
    pub async fn attach_stream(
        &self,
        call_id: &str,
        stream_id: &str,
        caller: &str,
        greeting: &str,
    ) -> SessionRecord {
        let mut sessions = self.sessions.lock().await;
        let record = sessions.entry(call_id.to_string()).or_insert_with(|| {
            tracing::warn!(call_id, "no session from intake, creating one at stream start");
            SessionRecord::new(call_id, caller, greeting)
        });
        record.stream_id = Some(stream_id.to_string());
        record.clone()
    }

    /// Returns false when the call has no session.
    pub async fn append_transcript(&self, call_id: &str, speaker: Speaker, text: &str) -> bool {
        match self.sessions.lock().await.get_mut(call_id) {
            Some(record) => {
                record.transcript.push(speaker, text);
                true
            }
            None => false,
        }
    }

    pub async fn thread_id(&self, call_id: &str) -> Option<String> {
        self.sessions
            .lock()
            .await
            .get(call_id)
            .and_then(|record| record.thread_id.clone())
    }

    pub async fn set_thread_id(&self, call_id: &str, thread_id: &str) {
        if let Some(record) = self.sessions.lock().await.get_mut(call_id) {
            record.thread_id = Some(thread_id.to_string());
        }
    }

    pub async fn remove(&self, call_id: &str) -> Option<SessionRecord> {
        self.sessions.lock().await.remove(call_id)
    }
}
