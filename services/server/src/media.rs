//! Per-call runtime for the media-stream socket.
//!
//! One task per call owns the [`CallRelay`] and is the only writer of the
//! telephony socket. Everything else (model connection, model events,
//! function results) reaches it through a single channel, so call state is
//! never touched concurrently.

use crate::state::AppState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use callbridge_core::dispatch;
use callbridge_core::intake::finish_call;
use callbridge_core::telephony::TelephonyEvent;
use callbridge_core::{CallRelay, Command, Input};
use callbridge_realtime::{Client, ServerRx};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

const CALL_CHANNEL_CAPACITY: usize = 256;
const MODEL_CHANNEL_CAPACITY: usize = 1024;

enum CallEvent {
    Relay(Input),
    ModelConnected(Client),
    ModelFailed(anyhow::Error),
}

pub async fn media_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    tracing::info!("media stream upgrade requested");
    ws.on_upgrade(move |socket| run_call(socket, state))
}

async fn connect_model(state: AppState, tx: mpsc::Sender<CallEvent>) {
    let event = match callbridge_realtime::connect_with_config(
        MODEL_CHANNEL_CAPACITY,
        state.model_config(),
    )
    .await
    {
        Ok(client) => CallEvent::ModelConnected(client),
        Err(e) => CallEvent::ModelFailed(e),
    };
    if tx.send(event).await.is_err() {
        tracing::debug!("call ended before the model connection settled");
    }
}

async fn forward_model_events(mut events: ServerRx, tx: mpsc::Sender<CallEvent>) {
    while let Some(event) = events.recv().await {
        if tx.send(CallEvent::Relay(Input::Model(event))).await.is_err() {
            return;
        }
    }
    let _ = tx.send(CallEvent::Relay(Input::ModelClosed)).await;
}

fn telephony_input(text: &str) -> Option<Input> {
    match TelephonyEvent::parse(text) {
        Ok(event) => Input::from_telephony(event),
        Err(e) => {
            tracing::warn!("dropping malformed telephony frame: {}", e);
            None
        }
    }
}

struct CallRuntime {
    state: AppState,
    sink: SplitSink<WebSocket, Message>,
    model: Option<Client>,
    tx: mpsc::Sender<CallEvent>,
}

impl CallRuntime {
    async fn execute(&mut self, command: Command, call_id: Option<&str>) {
        match command {
            Command::SendModel(event) => match &self.model {
                Some(client) => {
                    if let Err(e) = client.send(event).await {
                        tracing::warn!(?call_id, "model send failed: {:#}", e);
                    }
                }
                None => tracing::warn!(?call_id, event = event.kind(), "no model connection"),
            },
            Command::SendTelephony(frame) => match frame.to_json() {
                Ok(json) => {
                    if let Err(e) = self.sink.send(Message::Text(json.into())).await {
                        tracing::warn!(?call_id, "telephony send failed: {}", e);
                    }
                }
                Err(e) => tracing::error!("failed to serialize telephony frame: {}", e),
            },
            Command::AttachStream {
                call_id,
                stream_id,
                caller,
                greeting,
            } => {
                self.state
                    .sessions
                    .attach_stream(&call_id, &stream_id, &caller, &greeting)
                    .await;
            }
            Command::AppendTranscript { speaker, text } => {
                let Some(call_id) = call_id else {
                    tracing::warn!("transcript line before stream start dropped");
                    return;
                };
                if !self
                    .state
                    .sessions
                    .append_transcript(call_id, speaker, &text)
                    .await
                {
                    tracing::warn!(call_id, "transcript line for unknown session dropped");
                }
            }
            Command::Dispatch(call) => {
                let backend = self.state.backend.clone();
                let sessions = self.state.sessions.clone();
                let complaints_enabled = self.state.relay.complaints_enabled;
                let call_id = call_id.unwrap_or_default().to_string();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let reply = dispatch::run(
                        backend.as_ref(),
                        &sessions,
                        &call_id,
                        &call,
                        complaints_enabled,
                    )
                    .await;
                    if tx
                        .send(CallEvent::Relay(Input::ToolReply(reply)))
                        .await
                        .is_err()
                    {
                        tracing::debug!(%call_id, "call ended before function result");
                    }
                });
            }
            Command::CloseModel => {
                if let Some(client) = self.model.as_mut() {
                    client.close();
                }
            }
            Command::Finalize { call_id } => match call_id {
                Some(call_id) => {
                    finish_call(self.state.backend.as_ref(), &self.state.sessions, &call_id).await;
                }
                None => tracing::info!("stream closed before it started, nothing to finish"),
            },
        }
    }
}

async fn run_call(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<CallEvent>(CALL_CHANNEL_CAPACITY);
    let mut relay = CallRelay::new((*state.relay).clone());

    tokio::spawn(connect_model(state.clone(), tx.clone()));

    let mut runtime = CallRuntime {
        state,
        sink,
        model: None,
        tx: tx.clone(),
    };

    loop {
        let input = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match telephony_input(text.as_str()) {
                    Some(input) => input,
                    None => continue,
                },
                Some(Ok(Message::Close(_))) | None => Input::StreamClosed,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("telephony socket error: {}", e);
                    Input::StreamClosed
                }
            },
            Some(event) = rx.recv() => match event {
                CallEvent::Relay(input) => input,
                CallEvent::ModelConnected(mut client) => {
                    match client.server_events() {
                        Ok(events) => {
                            tokio::spawn(forward_model_events(events, tx.clone()));
                        }
                        Err(e) => {
                            tracing::error!("model events unavailable: {:#}", e);
                            continue;
                        }
                    }
                    runtime.model = Some(client);
                    Input::ModelOpened
                }
                CallEvent::ModelFailed(e) => {
                    tracing::error!("model connection failed, call stays silent: {:#}", e);
                    continue;
                }
            },
        };

        let commands = relay.handle(input);
        let call_id = relay.call_id().map(String::from);
        for command in commands {
            runtime.execute(command, call_id.as_deref()).await;
        }
        if relay.is_closed() {
            break;
        }
    }

    if relay.dropped_frames() > 0 {
        tracing::debug!(
            call_id = ?relay.call_id(),
            dropped_frames = relay.dropped_frames(),
            "audio dropped before the model was ready"
        );
    }
    if let Some(client) = runtime.model.as_ref() {
        match client.stats() {
            Ok(stats) => tracing::info!(
                call_id = ?relay.call_id(),
                responses = stats.responses(),
                total_tokens = stats.total_tokens(),
                input_tokens = stats.input_tokens(),
                output_tokens = stats.output_tokens(),
                "model usage"
            ),
            Err(e) => tracing::warn!("model usage unavailable: {:#}", e),
        }
    }
    if let Err(e) = runtime.sink.close().await {
        tracing::debug!("telephony socket already closed: {}", e);
    }
}
