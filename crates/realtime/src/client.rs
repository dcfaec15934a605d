use crate::client::stats::Stats;
use crate::types;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use types::{ClientEvent, ServerEvent};

pub(crate) mod config;
mod consts;
pub(crate) mod stats;
mod utils;

pub type ClientTx = tokio::sync::mpsc::Sender<ClientEvent>;
pub type ServerRx = tokio::sync::mpsc::Receiver<ServerEvent>;

/// One connection to the realtime model. Outgoing events go through a writer
/// task, incoming events are decoded by a reader task and handed to the single
/// consumer returned by [`Client::server_events`].
pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    s_rx: Option<ServerRx>,
    connected: bool,
    stats: Arc<Mutex<Stats>>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_rx: None,
            connected: false,
            stats: Arc::new(Mutex::new(Stats::new())),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(anyhow::anyhow!("already connected"));
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("failed to open model socket")?;
        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientEvent>(self.capacity);
        let (s_tx, s_rx) = tokio::sync::mpsc::channel::<ServerEvent>(self.capacity);
        self.c_tx = Some(c_tx);
        self.s_rx = Some(s_rx);
        self.connected = true;

        // Writer: runs until every sender is dropped, then closes the socket.
        tokio::spawn(async move {
            while let Some(event) = c_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send {}: {}", event.kind(), e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize {}: {}", event.kind(), e);
                    }
                }
            }
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!("close frame not sent: {}", e);
            }
        });

        let stats = self.stats.clone();
        tokio::spawn(async move {
            let mut close_reason = None;
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        close_reason = Some(e.to_string());
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if let ServerEvent::ResponseDone(response) = &event {
                                if let Some(usage) = response.response().usage() {
                                    if let Ok(mut stats_guard) = stats.lock() {
                                        stats_guard.update_usage(
                                            usage.total_tokens(),
                                            usage.input_tokens(),
                                            usage.output_tokens(),
                                        );
                                    } else {
                                        tracing::error!("failed to update stats");
                                    }
                                }
                            }
                            if s_tx.send(event).await.is_err() {
                                tracing::debug!("server event receiver dropped");
                                break;
                            }
                        }
                        Err(e) => {
                            let event_type = serde_json::from_str::<serde_json::Value>(&text)
                                .ok()
                                .and_then(|json| {
                                    json.get("type").and_then(|t| t.as_str()).map(String::from)
                                });
                            tracing::warn!(
                                "failed to deserialize event: {}, type={}",
                                e,
                                event_type.as_deref().unwrap_or("unknown")
                            );
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message of {} bytes", bin.len());
                    }
                    Message::Close(frame) => {
                        tracing::info!("model connection closed: {:?}", frame);
                        close_reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            // The receiver may already be gone on local shutdown.
            let _ = s_tx
                .send(ServerEvent::Close {
                    reason: close_reason,
                })
                .await;
        });
        Ok(())
    }

    /// Hands out the stream of server events. Only one consumer exists per
    /// connection, so the second call fails.
    pub fn server_events(&mut self) -> Result<ServerRx> {
        if !self.connected {
            return Err(anyhow::anyhow!("not connected yet"));
        }
        self.s_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("server events have already been taken"))
    }

    pub fn stats(&self) -> Result<Stats> {
        if let Ok(stats_guard) = self.stats.lock() {
            Ok(stats_guard.clone())
        } else {
            Err(anyhow::anyhow!("failed to get stats"))
        }
    }

    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(event)
                    .await
                    .map_err(|e| anyhow::anyhow!("model writer gone: {}", e.0.kind()))?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected or already closed")),
        }
    }

    /// Stops accepting client events; the writer sends a close frame once the
    /// queue drains.
    pub fn close(&mut self) {
        self.c_tx = None;
    }
}

pub async fn connect_with_config(capacity: usize, config: config::Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}
