//! Push channel client.
//!
//! Connects to the server's `/push` WebSocket endpoint and forwards
//! `MESSAGE` frames (file change / conflict notifications from other
//! devices) to the sync engine over a channel. Reconnects on a fixed 10s
//! delay rather than the teacher's exponential backoff — the push channel
//! is a nice-to-have for low sync latency, not on any critical path, so
//! there's no need to back off harder the longer it stays down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PushFrame {
    #[serde(rename = "CONNECT")]
    Connect { client_id: String },
    #[serde(rename = "CONNECTED")]
    Connected,
    #[serde(rename = "SUBSCRIBE")]
    Subscribe { path: String },
    #[serde(rename = "MESSAGE")]
    Message {
        event_type: String,
        path: String,
        version_vector: serde_json::Value,
        originating_client_id: String,
    },
    #[serde(rename = "SEND")]
    Send { payload: serde_json::Value },
    #[serde(rename = "ERROR")]
    Error { error: String },
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
}

/// Tracks whether the push channel is currently connected, so the
/// reconciliation loop can widen its poll interval while it's up (events
/// arrive in real time, no need to poll often) and shorten it while it's
/// down (fall back to polling as the primary change-discovery mechanism).
#[derive(Clone)]
pub struct ConnectionState(Arc<AtomicBool>);

impl ConnectionState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PushClient {
    server_url: String,
    token: String,
    client_id: String,
    state: ConnectionState,
}

impl PushClient {
    pub fn new(server_url: String, token: String, client_id: String, state: ConnectionState) -> Self {
        Self {
            server_url,
            token,
            client_id,
            state,
        }
    }

    /// Runs until `shutdown` is cancelled, reconnecting on every drop.
    pub async fn run(self, events: mpsc::UnboundedSender<PushFrame>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match self.connect_and_run(&events, &shutdown).await {
                Ok(()) => tracing::info!("push channel closed cleanly"),
                Err(e) => tracing::warn!("push channel connection failed: {e}"),
            }
            self.state.set(false);

            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn connect_and_run(
        &self,
        events: &mpsc::UnboundedSender<PushFrame>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let ws_url = build_ws_url(&self.server_url, &self.token);
        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        let (mut write, mut read) = stream.split();

        let connect_frame = serde_json::to_string(&PushFrame::Connect {
            client_id: self.client_id.clone(),
        })?;
        write.send(Message::Text(connect_frame.into())).await?;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let frame = serde_json::to_string(&PushFrame::Heartbeat)?;
                    if write.send(Message::Text(frame.into())).await.is_err() {
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(frame) = serde_json::from_str::<PushFrame>(&text) {
                                match frame {
                                    PushFrame::Connected => {
                                        self.state.set(true);
                                        tracing::info!("push channel connected");
                                    }
                                    PushFrame::Message { .. } => {
                                        let _ = events.send(frame);
                                    }
                                    PushFrame::Error { error } => {
                                        tracing::warn!("push channel error: {error}");
                                    }
                                    _ => {}
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        _ => {}
                    }
                }
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

fn build_ws_url(server_url: &str, token: &str) -> String {
    let ws_base = server_url.replacen("http://", "ws://", 1).replacen("https://", "wss://", 1);
    format!("{ws_base}/push?token={token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_http_scheme_to_websocket_scheme() {
        assert_eq!(
            build_ws_url("http://localhost:3000", "tok"),
            "ws://localhost:3000/push?token=tok"
        );
        assert_eq!(
            build_ws_url("https://sync.example.com", "tok"),
            "wss://sync.example.com/push?token=tok"
        );
    }

    #[test]
    fn connection_state_starts_disconnected() {
        let state = ConnectionState::new();
        assert!(!state.is_connected());
        state.set(true);
        assert!(state.is_connected());
    }
}
