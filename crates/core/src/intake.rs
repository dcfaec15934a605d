//! Start and end of a call's session: intake on the call-setup webhook, and
//! the flush once the media stream is gone.

use crate::backend::Backend;
use crate::session::{CallSetup, SessionRecord, SessionStore};
use crate::telephony::{self, CALLER_NUMBER_PARAMETER, FIRST_MESSAGE_PARAMETER};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("call setup is missing CallSid")]
    MissingCallId,
}

/// Resolves the greeting, stores the session and returns the TwiML that
/// connects the call's audio to `stream_url`. A failed greeting lookup falls
/// back to `default_greeting`.
pub async fn accept_call(
    backend: &dyn Backend,
    store: &SessionStore,
    setup: CallSetup,
    default_greeting: &str,
    stream_url: &str,
) -> Result<String, IntakeError> {
    let call_id = setup
        .call_sid
        .clone()
        .filter(|sid| !sid.trim().is_empty())
        .ok_or(IntakeError::MissingCallId)?;
    let caller = setup.caller().to_string();

    let greeting = match backend.fetch_greeting(&caller).await {
        Ok(Some(greeting)) => greeting,
        Ok(None) => default_greeting.to_string(),
        Err(e) => {
            tracing::warn!(%call_id, "greeting lookup failed, using default: {}", e);
            default_greeting.to_string()
        }
    };

    let record = SessionRecord::new(&call_id, &caller, &greeting).with_setup(setup);
    if store.create(record).await {
        tracing::warn!(%call_id, "replaced stale session");
    }
    tracing::info!(%call_id, %caller, "call accepted");

    Ok(telephony::connect_stream(
        stream_url,
        &[
            (FIRST_MESSAGE_PARAMETER, greeting.as_str()),
            (CALLER_NUMBER_PARAMETER, caller.as_str()),
        ],
    ))
}

/// Forwards the transcript, then removes the session. Returns false when the
/// call had no session left.
pub async fn finish_call(backend: &dyn Backend, store: &SessionStore, call_id: &str) -> bool {
    let Some(record) = store.get(call_id).await else {
        tracing::warn!(call_id, "no session to finish");
        return false;
    };
    let transcript = record.transcript.to_string();
    if let Err(e) = backend.persist_transcript(&record.caller, &transcript).await {
        tracing::error!(call_id, "failed to persist transcript: {}", e);
    }
    store.remove(call_id).await;
    tracing::info!(call_id, lines = record.transcript.lines().len(), "call finished");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MockBackend};
    use crate::relay::{CallRelay, Command, Input, RelaySettings};
    use crate::session::Speaker;
    use crate::telephony::TelephonyEvent;

    fn setup(caller: &str, call_sid: &str) -> CallSetup {
        CallSetup {
            from: Some(caller.to_string()),
            to: Some("+15550000000".to_string()),
            call_sid: Some(call_sid.to_string()),
            ..CallSetup::default()
        }
    }

    #[tokio::test]
    async fn personalised_greeting_is_stored_and_streamed() {
        let mut backend = MockBackend::new();
        backend
            .expect_fetch_greeting()
            .withf(|caller| caller == "+15551234567")
            .returning(|_| Ok(Some("Welcome back, Sam".to_string())))
            .once();
        let store = SessionStore::new();

        let xml = accept_call(
            &backend,
            &store,
            setup("+15551234567", "CA1"),
            "Hello",
            "wss://calls.example.com/media-stream",
        )
        .await
        .unwrap();

        assert!(xml.contains(r#"value="Welcome back, Sam""#));
        let record = store.get("CA1").await.unwrap();
        assert_eq!(record.greeting, "Welcome back, Sam");
        assert_eq!(record.setup.unwrap().to.as_deref(), Some("+15550000000"));
    }

    #[tokio::test]
    async fn missing_call_sid_is_rejected() {
        let backend = MockBackend::new();
        let store = SessionStore::new();
        let result = accept_call(&backend, &store, CallSetup::default(), "Hello", "wss://h/m").await;
        assert!(matches!(result, Err(IntakeError::MissingCallId)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn finish_persists_then_removes() {
        let store = SessionStore::new();
        store.create(SessionRecord::new("CA2", "+1555", "Hi")).await;
        store.append_transcript("CA2", Speaker::User, "hello").await;
        store.append_transcript("CA2", Speaker::Agent, "hi there").await;

        let mut backend = MockBackend::new();
        backend
            .expect_persist_transcript()
            .withf(|caller, transcript| {
                caller == "+1555" && transcript == "User: hello\nAgent: hi there\n"
            })
            .returning(|_, _| Ok(()))
            .once();

        assert!(finish_call(&backend, &store, "CA2").await);
        assert!(!store.contains("CA2").await);
        assert!(!finish_call(&backend, &store, "CA2").await);
    }

    #[tokio::test]
    async fn finish_removes_even_when_persist_fails() {
        let store = SessionStore::new();
        store.create(SessionRecord::new("CA3", "+1555", "Hi")).await;
        let mut backend = MockBackend::new();
        backend.expect_persist_transcript().returning(|_, _| {
            Err(BackendError::Status {
                status: 503,
                body: String::new(),
            })
        });

        assert!(finish_call(&backend, &store, "CA3").await);
        assert!(store.is_empty().await);
    }

    /// A call whose runtime dies before the stream closes keeps its record
    /// until `finish_call` runs for it.
    #[tokio::test]
    async fn abandoned_call_keeps_session_until_finished() {
        let mut backend = MockBackend::new();
        backend
            .expect_fetch_greeting()
            .returning(|_| Ok(Some("Hi Sam".to_string())));
        backend
            .expect_persist_transcript()
            .withf(|caller, _| caller == "+15551234567")
            .returning(|_, _| Ok(()))
            .once();
        let store = SessionStore::new();

        accept_call(
            &backend,
            &store,
            setup("+15551234567", "CA7"),
            "Hello",
            "wss://calls.example.com/media-stream",
        )
        .await
        .unwrap();

        let mut relay = CallRelay::new(RelaySettings::default());
        let commands = relay.handle(Input::StreamStarted {
            stream_id: "MZ7".to_string(),
            call_id: "CA7".to_string(),
            caller: Some("+15551234567".to_string()),
            greeting: Some("Hi Sam".to_string()),
        });
        assert!(!commands.iter().any(|c| matches!(c, Command::Finalize { .. })));
        drop(relay);

        assert!(store.contains("CA7").await);
        assert_eq!(store.len().await, 1);

        assert!(finish_call(&backend, &store, "CA7").await);
        assert!(!store.contains("CA7").await);
    }

    /// Setup with a failing greeting lookup, the stream starting with the
    /// intake parameters, and the model only becoming ready afterwards.
    #[tokio::test]
    async fn call_flow_with_failed_greeting_lookup() {
        let mut backend = MockBackend::new();
        backend.expect_fetch_greeting().returning(|_| {
            Err(BackendError::Status {
                status: 500,
                body: "down".to_string(),
            })
        });
        let store = SessionStore::new();
        let settings = RelaySettings::default();

        let xml = accept_call(
            &backend,
            &store,
            setup("+15551234567", "CA9"),
            &settings.default_greeting,
            "wss://calls.example.com/media-stream",
        )
        .await
        .unwrap();
        assert_eq!(store.get("CA9").await.unwrap().greeting, settings.default_greeting);
        assert!(xml.contains(r#"<Parameter name="callerNumber" value="+15551234567"/>"#));

        let start = format!(
            r#"{{"event":"start","start":{{"streamSid":"MZ9","callSid":"CA9","customParameters":{{"firstMessage":"{}","callerNumber":"+15551234567"}}}}}}"#,
            settings.default_greeting
        );
        let TelephonyEvent::Start { start } = TelephonyEvent::parse(&start).unwrap() else {
            panic!("expected start");
        };

        let mut relay = CallRelay::new(settings.clone());
        let commands = relay.handle(Input::StreamStarted {
            stream_id: start.stream_sid.clone(),
            call_id: start.call_sid.clone(),
            caller: start.caller_number().map(String::from),
            greeting: start.first_message().map(String::from),
        });
        for command in &commands {
            if let Command::AttachStream {
                call_id,
                stream_id,
                caller,
                greeting,
            } = command
            {
                store.attach_stream(call_id, stream_id, caller, greeting).await;
            }
        }
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("CA9").await.unwrap().stream_id.as_deref(), Some("MZ9"));

        let sent: Vec<&str> = relay
            .handle(Input::ModelOpened)
            .iter()
            .filter_map(|c| match c {
                Command::SendModel(event) => Some(event.kind()),
                _ => None,
            })
            .collect();
        assert_eq!(
            sent,
            vec!["session.update", "conversation.item.create", "response.create"]
        );
    }
}
