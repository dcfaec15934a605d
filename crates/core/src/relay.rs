use crate::dispatch::{FunctionCall, ToolReply};
use crate::session::Speaker;
use crate::telephony::{OutboundFrame, TelephonyEvent};
use crate::tools;
use callbridge_realtime_types::audio::{
    AudioFormat, ServerVadTurnDetection, TranscriptionModel, TurnDetection, Voice,
};
use callbridge_realtime_types::events::client::{
    ConversationItemCreateEvent, InputAudioBufferAppendEvent, ResponseCancelEvent,
    ResponseCreateEvent, SessionUpdateEvent,
};
use callbridge_realtime_types::{
    ClientEvent, Item, MessageItem, MessageRole, ResponseConfig, ServerEvent, Session,
};

pub const DEFAULT_GREETING: &str = "Hello, thanks for calling. How can I help you today?";
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly phone assistant for a towing \
company. Keep answers short and spoken. Use question_and_answer for questions about the \
business and book_tow once you have the pickup address.";

/// Model-side settings shared by every call.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub voice: Voice,
    pub instructions: String,
    pub default_greeting: String,
    pub complaints_enabled: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            voice: Voice::Alloy,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            default_greeting: DEFAULT_GREETING.to_string(),
            complaints_enabled: false,
        }
    }
}

impl RelaySettings {
    /// The `session.update` sent once the model socket opens.
    pub fn session(&self) -> Session {
        Session::builder()
            .with_modalities_enable_audio()
            .with_instructions(&self.instructions)
            .with_voice(self.voice.clone())
            .with_audio_format(AudioFormat::Mulaw)
            .with_input_audio_transcription_enable(TranscriptionModel::Whisper)
            .with_turn_detection_enable(TurnDetection::ServerVad(
                ServerVadTurnDetection::default(),
            ))
            .with_tools(tools::function_tools(self.complaints_enabled))
            .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    AwaitingModelReady,
    ModelReady,
    Streaming,
    Closed,
}

#[derive(Debug, Clone)]
pub enum Input {
    /// The telephony `start` event.
    StreamStarted {
        stream_id: String,
        call_id: String,
        caller: Option<String>,
        greeting: Option<String>,
    },
    /// Base64 audio from the caller.
    Media(String),
    /// The telephony `stop` event. The socket closing is what ends the call.
    StreamStopped,
    ModelOpened,
    Model(ServerEvent),
    ModelClosed,
    ToolReply(ToolReply),
    StreamClosed,
}

impl Input {
    /// Maps a media-stream frame to relay input. Frames the relay has no use
    /// for map to `None`.
    pub fn from_telephony(event: TelephonyEvent) -> Option<Self> {
        match event {
            TelephonyEvent::Connected { protocol } => {
                tracing::debug!(?protocol, "telephony stream connected");
                None
            }
            TelephonyEvent::Start { start } => Some(Input::StreamStarted {
                caller: start.caller_number().map(String::from),
                greeting: start.first_message().map(String::from),
                stream_id: start.stream_sid,
                call_id: start.call_sid,
            }),
            TelephonyEvent::Media { media } => Some(Input::Media(media.payload)),
            TelephonyEvent::Mark { mark } => {
                tracing::debug!(mark = ?mark.map(|m| m.name), "playback mark");
                None
            }
            TelephonyEvent::Stop { .. } => Some(Input::StreamStopped),
        }
    }
}

/// Side effects the runtime carries out for the relay, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SendModel(ClientEvent),
    SendTelephony(OutboundFrame),
    AttachStream {
        call_id: String,
        stream_id: String,
        caller: String,
        greeting: String,
    },
    AppendTranscript { speaker: Speaker, text: String },
    Dispatch(FunctionCall),
    CloseModel,
    /// Persist the transcript and drop the session record.
    Finalize { call_id: Option<String> },
}

/// Per-call state machine between the telephony stream and the model.
pub struct CallRelay {
    settings: RelaySettings,
    state: RelayState,
    model_open: bool,
    stream_id: Option<String>,
    call_id: Option<String>,
    /// Opening instruction waiting for the model to become ready.
    first_utterance: Option<String>,
    greeted: bool,
    dropped_frames: u64,
}

impl CallRelay {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            state: RelayState::AwaitingModelReady,
            model_open: false,
            stream_id: None,
            call_id: None,
            first_utterance: None,
            greeted: false,
            dropped_frames: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == RelayState::Closed
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        if self.state == RelayState::Closed {
            tracing::debug!("call closed, ignoring input");
            return vec![];
        }
        match input {
            Input::StreamStarted {
                stream_id,
                call_id,
                caller,
                greeting,
            } => self.on_stream_started(stream_id, call_id, caller, greeting),
            Input::Media(payload) => self.on_media(payload),
            Input::StreamStopped => {
                tracing::info!(stream_id = ?self.stream_id, "telephony stream stopped");
                vec![]
            }
            Input::ModelOpened => self.on_model_opened(),
            Input::Model(event) => self.on_model_event(event),
            Input::ModelClosed => {
                tracing::warn!(call_id = ?self.call_id, "model connection closed");
                self.model_open = false;
                vec![]
            }
            Input::ToolReply(reply) => self.on_tool_reply(reply),
            Input::StreamClosed => self.on_stream_closed(),
        }
    }

    fn on_stream_started(
        &mut self,
        stream_id: String,
        call_id: String,
        caller: Option<String>,
        greeting: Option<String>,
    ) -> Vec<Command> {
        tracing::info!(%call_id, %stream_id, "telephony stream started");
        let greeting = greeting.unwrap_or_else(|| self.settings.default_greeting.clone());
        let mut commands = vec![Command::AttachStream {
            call_id: call_id.clone(),
            stream_id: stream_id.clone(),
            caller: caller.unwrap_or_else(|| crate::session::UNKNOWN_CALLER.to_string()),
            greeting: greeting.clone(),
        }];
        self.stream_id = Some(stream_id);
        self.call_id = Some(call_id);
        if !self.greeted {
            self.first_utterance = Some(format!("Greet the caller with exactly: \"{greeting}\""));
        }
        if self.state == RelayState::ModelReady {
            commands.extend(self.release_first_utterance());
        }
        commands
    }

    fn on_model_opened(&mut self) -> Vec<Command> {
        if self.state != RelayState::AwaitingModelReady {
            tracing::warn!(state = ?self.state, "model opened twice");
            return vec![];
        }
        self.model_open = true;
        self.state = RelayState::ModelReady;
        let mut commands = vec![Command::SendModel(ClientEvent::SessionUpdate(
            SessionUpdateEvent::new(self.settings.session()),
        ))];
        if self.first_utterance.is_some() {
            commands.extend(self.release_first_utterance());
        }
        commands
    }

    fn release_first_utterance(&mut self) -> Vec<Command> {
        let Some(text) = self.first_utterance.take() else {
            return vec![];
        };
        self.greeted = true;
        self.state = RelayState::Streaming;
        let item = MessageItem::builder()
            .with_role(MessageRole::User)
            .with_input_text(&text)
            .build();
        vec![
            Command::SendModel(ClientEvent::ConversationItemCreate(
                ConversationItemCreateEvent::new(Item::Message(item)),
            )),
            Command::SendModel(ClientEvent::ResponseCreate(ResponseCreateEvent::new())),
        ]
    }

    fn on_media(&mut self, payload: String) -> Vec<Command> {
        if !self.model_open {
            self.dropped_frames += 1;
            return vec![];
        }
        vec![Command::SendModel(ClientEvent::InputAudioBufferAppend(
            InputAudioBufferAppendEvent::new(payload),
        ))]
    }

    fn on_model_event(&mut self, event: ServerEvent) -> Vec<Command> {
        match event {
            ServerEvent::ResponseAudioDelta(delta) => match &self.stream_id {
                Some(stream_id) => vec![Command::SendTelephony(OutboundFrame::media(
                    stream_id,
                    delta.delta(),
                ))],
                None => vec![],
            },
            // No response is requested before the stream starts, so a barge-in
            // without a stream has nothing to clear or cancel.
            ServerEvent::InputAudioBufferSpeechStarted(started) => match &self.stream_id {
                Some(stream_id) => {
                    tracing::debug!(audio_start_ms = started.audio_start_ms(), "caller barged in");
                    vec![
                        Command::SendTelephony(OutboundFrame::clear(stream_id)),
                        Command::SendModel(ClientEvent::ResponseCancel(ResponseCancelEvent::new())),
                    ]
                }
                None => {
                    tracing::debug!("speech before stream start, nothing to interrupt");
                    vec![]
                }
            },
            ServerEvent::ResponseFunctionCallArgumentsDone(done) => {
                vec![Command::Dispatch(FunctionCall {
                    call_id: done.call_id().to_string(),
                    name: done.name().to_string(),
                    arguments: done.arguments().to_string(),
                })]
            }
            ServerEvent::ResponseDone(done) => match done.response().first_transcript() {
                Some(text) => vec![Command::AppendTranscript {
                    speaker: Speaker::Agent,
                    text: text.trim().to_string(),
                }],
                None => vec![],
            },
            ServerEvent::ConversationItemInputAudioTranscriptionCompleted(completed) => {
                let text = completed.transcript().trim();
                if text.is_empty() {
                    return vec![];
                }
                vec![Command::AppendTranscript {
                    speaker: Speaker::User,
                    text: text.to_string(),
                }]
            }
            ServerEvent::Close { reason } => {
                tracing::warn!(?reason, "model socket closed");
                self.model_open = false;
                vec![]
            }
            ServerEvent::ConversationItemInputAudioTranscriptionFailed(failed) => {
                tracing::warn!(
                    call_id = ?self.call_id,
                    "caller transcription failed, line lost: {}",
                    failed.error().message()
                );
                vec![]
            }
            ServerEvent::Error(error) => {
                tracing::error!(
                    error_type = error.error().error_type(),
                    code = ?error.error().code(),
                    "model error: {}",
                    error.error().message()
                );
                vec![]
            }
            ServerEvent::SessionCreated(_)
            | ServerEvent::SessionUpdated(_)
            | ServerEvent::InputAudioBufferCommitted(_)
            | ServerEvent::InputAudioBufferSpeechStopped(_)
            | ServerEvent::ResponseContentPartDone(_)
            | ServerEvent::RateLimitsUpdated(_)
            | ServerEvent::ResponseCreated(_) => {
                tracing::info!(event = event.kind(), "model event");
                vec![]
            }
            other => {
                tracing::trace!(event = other.kind(), "model event ignored");
                vec![]
            }
        }
    }

    fn on_tool_reply(&mut self, reply: ToolReply) -> Vec<Command> {
        if !self.model_open {
            tracing::warn!(call_id = %reply.call_id, "model gone, dropping function result");
            return vec![];
        }
        let mut commands = vec![];
        if let Some(output) = reply.output {
            commands.push(Command::SendModel(ClientEvent::ConversationItemCreate(
                ConversationItemCreateEvent::new(Item::function_output(&reply.call_id, &output)),
            )));
        }
        if let Some(instructions) = reply.follow_up {
            commands.push(Command::SendModel(ClientEvent::ResponseCreate(
                ResponseCreateEvent::new().with_response(ResponseConfig::with_instructions(
                    &instructions,
                )),
            )));
        }
        commands
    }

    fn on_stream_closed(&mut self) -> Vec<Command> {
        tracing::info!(
            call_id = ?self.call_id,
            dropped_frames = self.dropped_frames,
            "telephony stream closed"
        );
        let mut commands = vec![];
        if self.model_open {
            commands.push(Command::CloseModel);
            self.model_open = false;
        }
        commands.push(Command::Finalize {
            call_id: self.call_id.clone(),
        });
        self.state = RelayState::Closed;
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> Input {
        Input::StreamStarted {
            stream_id: "MZ1".to_string(),
            call_id: "CA1".to_string(),
            caller: Some("+15551234567".to_string()),
            greeting: Some("Hi Sam".to_string()),
        }
    }

    fn server_event(json: serde_json::Value) -> Input {
        Input::Model(serde_json::from_value(json).unwrap())
    }

    fn model_events(commands: &[Command]) -> Vec<&'static str> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::SendModel(event) => Some(event.kind()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn telephony_frames_map_to_inputs() {
        let start = TelephonyEvent::parse(
            r#"{"event":"start","start":{"streamSid":"MZ1","callSid":"CA1","customParameters":{"firstMessage":"Hi Sam"}}}"#,
        )
        .unwrap();
        let Some(Input::StreamStarted {
            stream_id,
            call_id,
            caller,
            greeting,
        }) = Input::from_telephony(start)
        else {
            panic!("expected stream start");
        };
        assert_eq!((stream_id.as_str(), call_id.as_str()), ("MZ1", "CA1"));
        assert_eq!(caller, None);
        assert_eq!(greeting.as_deref(), Some("Hi Sam"));

        let connected = TelephonyEvent::parse(r#"{"event":"connected","protocol":"Call"}"#).unwrap();
        assert!(Input::from_telephony(connected).is_none());
        let media =
            TelephonyEvent::parse(r#"{"event":"media","media":{"payload":"AAAA"}}"#).unwrap();
        assert!(matches!(Input::from_telephony(media), Some(Input::Media(p)) if p == "AAAA"));
    }

    #[test]
    fn session_settings_target_phone_audio() {
        let session = RelaySettings::default().session();
        assert_eq!(session.input_audio_format(), Some(AudioFormat::Mulaw));
        assert_eq!(session.output_audio_format(), Some(AudioFormat::Mulaw));
        assert_eq!(session.voice(), Some(&Voice::Alloy));
        assert!(session.turn_detection().is_some());
        assert_eq!(session.tools().len(), 2);
    }

    #[test]
    fn first_utterance_waits_for_model_when_stream_starts_first() {
        let mut relay = CallRelay::new(RelaySettings::default());

        let commands = relay.handle(started());
        assert!(model_events(&commands).is_empty());
        assert!(matches!(commands[0], Command::AttachStream { .. }));
        assert_eq!(relay.state(), RelayState::AwaitingModelReady);

        let commands = relay.handle(Input::ModelOpened);
        assert_eq!(
            model_events(&commands),
            vec!["session.update", "conversation.item.create", "response.create"]
        );
        assert_eq!(relay.state(), RelayState::Streaming);
    }

    #[test]
    fn first_utterance_waits_for_stream_when_model_opens_first() {
        let mut relay = CallRelay::new(RelaySettings::default());

        let commands = relay.handle(Input::ModelOpened);
        assert_eq!(model_events(&commands), vec!["session.update"]);
        assert_eq!(relay.state(), RelayState::ModelReady);

        let commands = relay.handle(started());
        assert_eq!(
            model_events(&commands),
            vec!["conversation.item.create", "response.create"]
        );
        assert_eq!(relay.state(), RelayState::Streaming);

        // A repeated start never greets twice.
        let commands = relay.handle(started());
        assert!(model_events(&commands).is_empty());
    }

    #[test]
    fn first_utterance_carries_the_greeting() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        let commands = relay.handle(Input::ModelOpened);
        let Command::SendModel(ClientEvent::ConversationItemCreate(create)) = &commands[1] else {
            panic!("expected conversation item");
        };
        let json = serde_json::to_value(create.item()).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json["content"][0]["text"].as_str().unwrap().contains("Hi Sam"));
    }

    #[test]
    fn missing_greeting_falls_back_to_default() {
        let mut relay = CallRelay::new(RelaySettings::default());
        let commands = relay.handle(Input::StreamStarted {
            stream_id: "MZ1".to_string(),
            call_id: "CA1".to_string(),
            caller: None,
            greeting: None,
        });
        assert_eq!(
            commands[0],
            Command::AttachStream {
                call_id: "CA1".to_string(),
                stream_id: "MZ1".to_string(),
                caller: "unknown".to_string(),
                greeting: DEFAULT_GREETING.to_string(),
            }
        );
    }

    #[test]
    fn audio_before_model_open_is_dropped_not_replayed() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        assert!(relay.handle(Input::Media("early1".to_string())).is_empty());
        assert!(relay.handle(Input::Media("early2".to_string())).is_empty());
        assert_eq!(relay.dropped_frames(), 2);

        let commands = relay.handle(Input::ModelOpened);
        assert!(!model_events(&commands).contains(&"input_audio_buffer.append"));

        let commands = relay.handle(Input::Media("late".to_string()));
        assert_eq!(
            commands,
            vec![Command::SendModel(ClientEvent::InputAudioBufferAppend(
                InputAudioBufferAppendEvent::new("late".to_string())
            ))]
        );
    }

    #[test]
    fn model_audio_goes_to_the_stream() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);
        let commands = relay.handle(server_event(serde_json::json!({
            "type": "response.audio.delta",
            "response_id": "r1",
            "item_id": "i1",
            "delta": "AAAA"
        })));
        assert_eq!(
            commands,
            vec![Command::SendTelephony(OutboundFrame::media("MZ1", "AAAA"))]
        );
    }

    #[test]
    fn barge_in_clears_once_and_cancels_once() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);
        for _ in 0..3 {
            relay.handle(server_event(serde_json::json!({
                "type": "response.audio.delta",
                "delta": "AAAA"
            })));
        }
        let commands = relay.handle(server_event(serde_json::json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 900,
            "item_id": "i2"
        })));
        assert_eq!(
            commands,
            vec![
                Command::SendTelephony(OutboundFrame::clear("MZ1")),
                Command::SendModel(ClientEvent::ResponseCancel(ResponseCancelEvent::new())),
            ]
        );
    }

    #[test]
    fn speech_before_stream_start_interrupts_nothing() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(Input::ModelOpened);
        let commands = relay.handle(server_event(serde_json::json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 10,
            "item_id": "i1"
        })));
        assert!(commands.is_empty());

        relay.handle(started());
        let commands = relay.handle(server_event(serde_json::json!({
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 800,
            "item_id": "i2"
        })));
        assert_eq!(
            commands,
            vec![
                Command::SendTelephony(OutboundFrame::clear("MZ1")),
                Command::SendModel(ClientEvent::ResponseCancel(ResponseCancelEvent::new())),
            ]
        );
    }

    #[test]
    fn failed_transcription_adds_no_line() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);
        let commands = relay.handle(server_event(serde_json::json!({
            "type": "conversation.item.input_audio_transcription.failed",
            "item_id": "i1",
            "content_index": 0,
            "error": {"type": "transcription_error", "message": "audio unreadable"}
        })));
        assert!(commands.is_empty());
        assert_eq!(relay.state(), RelayState::Streaming);
    }

    #[test]
    fn transcript_lines_follow_event_order() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);

        let mut lines = vec![];
        lines.extend(relay.handle(server_event(serde_json::json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "i1",
            "content_index": 0,
            "transcript": "hello "
        }))));
        lines.extend(relay.handle(server_event(serde_json::json!({
            "type": "response.done",
            "response": {
                "id": "r1",
                "status": "completed",
                "output": [{
                    "type": "message",
                    "id": "i2",
                    "role": "assistant",
                    "content": [{"type": "audio", "transcript": "hi there"}]
                }]
            }
        }))));

        let mut transcript = crate::session::Transcript::default();
        for command in lines {
            if let Command::AppendTranscript { speaker, text } = command {
                transcript.push(speaker, text);
            }
        }
        assert_eq!(transcript.to_string(), "User: hello\nAgent: hi there\n");
    }

    #[test]
    fn function_call_is_dispatched_and_reply_fed_back() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);

        let commands = relay.handle(server_event(serde_json::json!({
            "type": "response.function_call_arguments.done",
            "call_id": "call_1",
            "name": "book_tow",
            "arguments": "{\"address\":\"1 Main St\"}"
        })));
        assert_eq!(
            commands,
            vec![Command::Dispatch(FunctionCall {
                call_id: "call_1".to_string(),
                name: "book_tow".to_string(),
                arguments: "{\"address\":\"1 Main St\"}".to_string(),
            })]
        );

        let commands = relay.handle(Input::ToolReply(ToolReply {
            call_id: "call_1".to_string(),
            output: Some("Booked".to_string()),
            follow_up: Some("Tell the caller it is booked".to_string()),
        }));
        assert_eq!(
            model_events(&commands),
            vec!["conversation.item.create", "response.create"]
        );
    }

    #[test]
    fn apology_reply_keeps_the_call_open() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);

        let commands = relay.handle(Input::ToolReply(ToolReply::apology("call_1")));
        let [Command::SendModel(ClientEvent::ResponseCreate(create))] = commands.as_slice() else {
            panic!("expected a single response.create");
        };
        assert_eq!(
            create.response().and_then(|r| r.instructions()),
            Some(crate::dispatch::APOLOGY_INSTRUCTIONS)
        );
        assert_eq!(relay.state(), RelayState::Streaming);
        assert_eq!(relay.handle(Input::Media("x".to_string())).len(), 1);
    }

    #[test]
    fn stream_close_finalizes_once() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);

        let commands = relay.handle(Input::StreamClosed);
        assert_eq!(
            commands,
            vec![
                Command::CloseModel,
                Command::Finalize {
                    call_id: Some("CA1".to_string())
                }
            ]
        );
        assert!(relay.is_closed());
        assert!(relay.handle(Input::StreamClosed).is_empty());
        assert!(relay.handle(Input::Media("x".to_string())).is_empty());
    }

    #[test]
    fn close_before_model_skips_model_shutdown() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        let commands = relay.handle(Input::StreamClosed);
        assert_eq!(
            commands,
            vec![Command::Finalize {
                call_id: Some("CA1".to_string())
            }]
        );
    }

    #[test]
    fn model_loss_silences_the_call_without_ending_it() {
        let mut relay = CallRelay::new(RelaySettings::default());
        relay.handle(started());
        relay.handle(Input::ModelOpened);
        relay.handle(Input::ModelClosed);

        assert!(relay.handle(Input::Media("x".to_string())).is_empty());
        assert_eq!(relay.state(), RelayState::Streaming);
        assert_eq!(
            relay.handle(Input::StreamClosed),
            vec![Command::Finalize {
                call_id: Some("CA1".to_string())
            }]
        );
    }
}
