//! Server→client push channel.
//!
//! Each authenticated user gets one logical hub — a `broadcast::Sender` that
//! every one of that user's connected devices subscribes to. When the
//! reconciliation service records a sync event, it fans it out through the
//! hub so every other online device learns about the change without
//! polling. Shape is lifted from the teacher's `ws/agent_registry.rs`
//! (per-connection forwarding task over a registry) merged with
//! `ws/ui.rs` (broadcast fan-out for multiple subscribers).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;

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

pub struct PushHub {
    tx: broadcast::Sender<PushFrame>,
}

impl PushHub {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }
}

/// Registry of per-user push hubs, keyed by user id.
#[derive(Clone)]
pub struct PushRegistry {
    hubs: Arc<DashMap<String, PushHub>>,
}

impl PushRegistry {
    pub fn new() -> Self {
        Self {
            hubs: Arc::new(DashMap::new()),
        }
    }

    fn hub_for(&self, user_id: &str) -> broadcast::Sender<PushFrame> {
        self.hubs
            .entry(user_id.to_string())
            .or_insert_with(PushHub::new)
            .tx
            .clone()
    }

    pub fn notify(&self, user_id: &str, frame: PushFrame) {
        if let Some(hub) = self.hubs.get(user_id) {
            // Err just means no subscribers are currently connected.
            let _ = hub.tx.send(frame);
        }
    }
}

impl Default for PushRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct PushQuery {
    pub token: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<PushQuery>,
) -> impl IntoResponse {
    let claims = match crate::services::auth::verify_token(&query.token, &state.config.jwt_secret) {
        Ok(c) => c,
        Err(_) => {
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub)).into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.push.hub_for(&user_id).subscribe();
    let (local_tx, mut local_rx) = mpsc::unbounded_channel::<PushFrame>();

    let _ = local_tx.send(PushFrame::Connected);

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = local_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Ok(json) = serde_json::to_string(&frame) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }
                broadcast = rx.recv() => {
                    match broadcast {
                        Ok(frame) => {
                            if let Ok(json) = serde_json::to_string(&frame) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Push client for {user_id} lagged by {n} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let _: Result<PushFrame, _> = serde_json::from_str(&text);
                    // Clients only ever SUBSCRIBE/heartbeat inbound; both are
                    // no-ops server-side today — subscriptions are implicitly
                    // per-user, not per-path.
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
