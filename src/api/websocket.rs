//! WebSocket layer for realtime change notification.
//!
//! Handles WebSocket upgrade, heartbeat (30s), session max (1h), notifier
//! registration, and per-connection rate limiting (10 incoming messages/sec).
//!
//! Connection lifecycle:
//! 1. Client calls `POST /api/auth/ws-ticket` to get a one-time ticket
//! 2. Client opens `GET /ws/connect?ticket=xxx`: ticket validated, WS upgraded
//! 3. Session registers with the `ChangeNotifier`, server sends Welcome
//! 4. Every committed mutation pushes `appointments:update`
//! 5. Heartbeat every 30s: 3 missed = disconnect
//! 6. Session max 1h: warning at 59 min, close at 60 min

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;
use crate::identity::Identity;
use crate::notifier::{ReconnectionPolicy, WsIncoming, WsOutgoing};

/// Heartbeat interval: server sends Heartbeat every 30 seconds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum WebSocket session duration: 1 hour.
const SESSION_MAX: Duration = Duration::from_secs(3600);

/// Warning sent this many seconds before session expiry.
const EXPIRY_WARNING: Duration = Duration::from_secs(60);

/// Disconnect after this many missed heartbeats (3 × 30s = 90s).
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Maximum incoming messages per second per connection.
const MAX_INCOMING_PER_SECOND: u32 = 10;

/// Outgoing queue depth per connection.
const OUTGOING_BUFFER: usize = 64;

/// Query parameters for WebSocket upgrade.
#[derive(Deserialize)]
pub struct WsAuthQuery {
    ticket: String,
}

// ═══════════════════════════════════════════════════════════
// WsSessionState: heartbeat and expiry bookkeeping
// ═══════════════════════════════════════════════════════════

/// Action returned by `WsSessionState::on_heartbeat_tick()`.
#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    /// Send a heartbeat and continue.
    SendHeartbeat,
    /// Send an expiry warning with seconds remaining.
    SendExpiryWarning { seconds_remaining: u32 },
    /// Session has expired: disconnect.
    SessionExpired,
    /// Too many missed heartbeats: disconnect.
    HeartbeatTimeout,
}

/// Per-connection session state, kept apart from `handle_ws` so heartbeat,
/// session max and rate limiting run without a live socket.
pub(crate) struct WsSessionState {
    session_start: Instant,
    missed_heartbeats: u32,
    expiry_warned: bool,
    incoming_times: VecDeque<Instant>,
}

impl WsSessionState {
    fn new() -> Self {
        Self::with_start(Instant::now())
    }

    fn with_start(start: Instant) -> Self {
        Self {
            session_start: start,
            missed_heartbeats: 0,
            expiry_warned: false,
            incoming_times: VecDeque::new(),
        }
    }

    /// Called when a Pong is received from the client.
    fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    /// Called on each heartbeat tick. Returns the action to take.
    fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        let elapsed = self.session_start.elapsed();

        if elapsed >= SESSION_MAX {
            return HeartbeatAction::SessionExpired;
        }

        if !self.expiry_warned && elapsed >= SESSION_MAX - EXPIRY_WARNING {
            let remaining = (SESSION_MAX - elapsed).as_secs() as u32;
            self.expiry_warned = true;
            return HeartbeatAction::SendExpiryWarning {
                seconds_remaining: remaining,
            };
        }

        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }

        // Normal: send heartbeat and increment miss counter
        self.missed_heartbeats += 1;
        HeartbeatAction::SendHeartbeat
    }

    /// Check incoming rate limit. Returns true if allowed.
    fn check_rate(&mut self) -> bool {
        check_incoming_rate(&mut self.incoming_times)
    }
}

/// WebSocket upgrade handler.
///
/// Validates the one-time ticket before upgrading the connection.
/// The ticket was obtained via `POST /api/auth/ws-ticket`.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    Query(query): Query<WsAuthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = ctx
        .ws_tickets
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .consume(&query.ticket)
        .ok_or(ApiError::Unauthorized)?;

    tracing::info!(user_id = %identity.id, role = %identity.role, "WebSocket upgrade accepted");
    let core = ctx.core.clone();
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, core, identity)))
}

/// Main WebSocket connection handler.
///
/// Spawns a sender task for channel→WS forwarding, then runs the
/// receive + heartbeat loop until disconnect or session expiry.
async fn handle_ws(socket: WebSocket, core: Arc<CoreState>, identity: Identity) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<WsOutgoing>(OUTGOING_BUFFER);
    let session_id = uuid::Uuid::new_v4().to_string();

    core.notifier
        .register(&session_id, identity.id, identity.role, tx.clone());

    // Spawn sender task (reads from channel, writes to WebSocket)
    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        let mut rx = rx;
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = tx
        .send(WsOutgoing::Welcome {
            session_id: session_id.clone(),
            role: identity.role,
            reconnect_policy: ReconnectionPolicy::default(),
        })
        .await;

    // Main receive + heartbeat loop
    let mut session = WsSessionState::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // Consume initial immediate tick

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(ref text))) => {
                        if !session.check_rate() {
                            continue;
                        }
                        match serde_json::from_str::<WsIncoming>(text) {
                            Ok(WsIncoming::Pong {}) => session.on_pong(),
                            Ok(WsIncoming::Ready {}) => {}
                            Err(_) => {
                                tracing::debug!(
                                    session_id = %session_id,
                                    "Ignoring unrecognized WS message"
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ping/Pong handled by axum/tungstenite
                }
            }
            _ = heartbeat.tick() => {
                match session.on_heartbeat_tick() {
                    HeartbeatAction::SessionExpired => {
                        let _ = tx.send(WsOutgoing::SessionExpiring {
                            seconds_remaining: 0,
                        }).await;
                        break;
                    }
                    HeartbeatAction::SendExpiryWarning { seconds_remaining } => {
                        let _ = tx.send(WsOutgoing::SessionExpiring {
                            seconds_remaining,
                        }).await;
                    }
                    HeartbeatAction::HeartbeatTimeout => {
                        tracing::info!(
                            session_id = %session_id,
                            "{MAX_MISSED_HEARTBEATS} missed heartbeats, disconnecting"
                        );
                        break;
                    }
                    HeartbeatAction::SendHeartbeat => {
                        let _ = tx.send(WsOutgoing::Heartbeat {
                            server_time: chrono::Utc::now().to_rfc3339(),
                        }).await;
                    }
                }
            }
        }
    }

    // Cleanup: unregister first so the notifier drops its sender clone,
    // then drop ours to stop the sender task.
    core.notifier.unregister(&session_id);
    drop(tx);
    let _ = sender_handle.await;

    tracing::info!(session_id = %session_id, user_id = %identity.id, "WebSocket disconnected");
}

/// Check if an incoming message is within the rate limit (10/sec).
///
/// Returns `true` if allowed, `false` if rate-limited.
fn check_incoming_rate(timestamps: &mut VecDeque<Instant>) -> bool {
    let now = Instant::now();
    let one_sec_ago = now - Duration::from_secs(1);

    while let Some(&front) = timestamps.front() {
        if front < one_sec_ago {
            timestamps.pop_front();
        } else {
            break;
        }
    }

    if timestamps.len() as u32 >= MAX_INCOMING_PER_SECOND {
        return false;
    }

    timestamps.push_back(now);
    true
}
