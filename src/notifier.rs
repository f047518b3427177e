//! Push-to-invalidate fan-out for connected realtime sessions.
//!
//! Every committed mutation calls [`ChangeNotifier::appointments_changed`],
//! which sends a payload-free `appointments:update` to every registered
//! session. Clients re-fetch through the read path on receipt. Delivery is
//! best-effort: a full or closed channel drops the event, and nothing is
//! queued for sessions that reconnect later.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::enums::Role;

/// Reconnection policy communicated to the client in Welcome.
///
/// Clients back off with
/// `delay = min(initial_delay_ms * 2^attempt, max_delay_ms) + random_jitter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionPolicy {
    /// Initial delay before first reconnection attempt (ms).
    pub initial_delay_ms: u32,
    /// Maximum delay cap (ms).
    pub max_delay_ms: u32,
    /// Maximum number of reconnection attempts before giving up.
    pub max_retries: u32,
    /// Maximum random jitter added to each delay (ms).
    pub jitter_ms: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: 10,
            jitter_ms: 500,
        }
    }
}

/// Server → client WebSocket messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutgoing {
    /// Connection acknowledged. Includes reconnection backoff policy.
    Welcome {
        session_id: String,
        role: Role,
        reconnect_policy: ReconnectionPolicy,
    },
    /// Server heartbeat (client should respond with Pong).
    Heartbeat { server_time: String },
    /// Session expiring soon (or expired when seconds_remaining == 0).
    SessionExpiring { seconds_remaining: u32 },
    /// Something changed; re-fetch.
    #[serde(rename = "appointments:update")]
    AppointmentsUpdate {},
}

/// Client → server WebSocket messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsIncoming {
    Ready {},
    Pong {},
}

#[derive(Debug)]
struct SessionHandle {
    user_id: Uuid,
    role: Role,
    tx: mpsc::Sender<WsOutgoing>,
}

/// Registry of live realtime sessions keyed by session id.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(
        &self,
        session_id: &str,
        user_id: Uuid,
        role: Role,
        tx: mpsc::Sender<WsOutgoing>,
    ) {
        self.write()
            .insert(session_id.to_string(), SessionHandle { user_id, role, tx });
        tracing::debug!(
            session_id,
            user_id = %user_id,
            role = ?role,
            user_sessions = self.sessions_for_user(&user_id),
            "Realtime session registered"
        );
    }

    pub fn unregister(&self, session_id: &str) {
        if self.write().remove(session_id).is_some() {
            tracing::debug!(session_id, "Realtime session unregistered");
        }
    }

    pub fn session_count(&self) -> usize {
        self.read().len()
    }

    /// Number of live sessions opened by `user_id`.
    pub fn sessions_for_user(&self, user_id: &Uuid) -> usize {
        self.read().values().filter(|s| &s.user_id == user_id).count()
    }

    /// Send `msg` to every session without waiting. Returns how many
    /// sessions accepted it.
    pub fn broadcast(&self, msg: WsOutgoing) -> usize {
        let sessions = self.read();
        let mut delivered = 0;
        for (session_id, handle) in sessions.iter() {
            match handle.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id,
                        role = ?handle.role,
                        "Realtime channel full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(session_id, "Realtime channel closed, event dropped");
                }
            }
        }
        delivered
    }

    /// Invalidate every connected client's appointment view.
    pub fn appointments_changed(&self) -> usize {
        let delivered = self.broadcast(WsOutgoing::AppointmentsUpdate {});
        tracing::debug!(delivered, "appointments:update broadcast");
        delivered
    }
}
