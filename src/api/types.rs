//! Shared types for the HTTP API layer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::identity::Identity;

/// Lifetime of a WebSocket upgrade ticket.
pub const WS_TICKET_TTL: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
/// Wraps `CoreState` plus API-specific caches.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub ws_tickets: Arc<Mutex<WsTicketStore>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        let limiter = RateLimiter::new(
            core.settings.rate_limit_max,
            core.settings.rate_limit_window,
        );
        Self {
            core,
            rate_limiter: Arc::new(Mutex::new(limiter)),
            ws_tickets: Arc::new(Mutex::new(WsTicketStore::new())),
        }
    }
}

/// Raw bearer token of the current request, injected by the auth middleware
/// next to the resolved [`Identity`]. Used by logout.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// Parse a path id. Malformed ids cannot match a row, so they read as absent.
pub fn parse_id(raw: &str, entity: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("{entity} not found")))
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-client sliding window
// ═══════════════════════════════════════════════════════════

/// Per-client rate limiter: at most `max_requests` per `window`.
pub struct RateLimiter {
    windows: HashMap<String, VecDeque<Instant>>,
    max_requests: u32,
    window: Duration,
    last_sweep: Instant,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            max_requests,
            window,
            last_sweep: Instant::now(),
        }
    }

    /// Check if a client is within the limit. Returns `Ok(())` or
    /// `Err(retry_after_secs)` if exceeded.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let window = self.window;
        if now.duration_since(self.last_sweep) >= window {
            self.sweep(now);
        }
        let entries = self.windows.entry(key.to_string()).or_default();

        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() as u32 >= self.max_requests {
            let retry_after = entries
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            return Err(retry_after.as_secs().max(1));
        }

        entries.push_back(now);
        Ok(())
    }

    /// Drop clients with no request inside the current window.
    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        self.windows.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|newest| now.duration_since(*newest) < window)
        });
        self.last_sweep = now;
    }
}

// ═══════════════════════════════════════════════════════════
// WS ticket store: one-time WebSocket upgrade tokens
// ═══════════════════════════════════════════════════════════

/// One-time WebSocket upgrade ticket.
/// Keeps bearer tokens out of WS query params.
struct WsTicket {
    identity: Identity,
    expires_at: Instant,
}

/// Store for one-time WebSocket upgrade tickets.
pub struct WsTicketStore {
    tickets: HashMap<String, WsTicket>,
}

impl WsTicketStore {
    pub fn new() -> Self {
        Self {
            tickets: HashMap::new(),
        }
    }

    /// Issue a one-time ticket for the given identity (30-second TTL).
    pub fn issue(&mut self, identity: Identity) -> String {
        self.cleanup();
        let ticket = Uuid::new_v4().to_string();
        self.tickets.insert(
            ticket.clone(),
            WsTicket {
                identity,
                expires_at: Instant::now() + WS_TICKET_TTL,
            },
        );
        ticket
    }

    /// Consume a ticket (one-time use).
    pub fn consume(&mut self, ticket: &str) -> Option<Identity> {
        let entry = self.tickets.remove(ticket)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.identity)
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        self.tickets.retain(|_, t| now < t.expires_at);
    }
}

impl Default for WsTicketStore {
    fn default() -> Self {
        Self::new()
    }
}
