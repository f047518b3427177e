//! Verified caller identity and the bearer-token authenticator that produces it.
//!
//! Services authorize against [`Identity`] only. How a credential becomes an
//! identity is hidden behind [`Authenticator`]; [`SessionTokens`] is the
//! implementation the server ships with.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MAX_TOKEN_TTL_HOURS;
use crate::error::ServiceError;
use crate::models::enums::Role;
use crate::models::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
}

impl Identity {
    pub fn require_role(&self, role: Role) -> Result<(), ServiceError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "{} access required",
                role.as_str()
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            name: user.name.clone(),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing or invalid credential")]
    Unauthenticated,

    #[error("Credential expired")]
    Expired,
}

/// Resolves a bearer credential to a verified identity.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}

// ═══════════════════════════════════════════════════════════
// Token helpers
// ═══════════════════════════════════════════════════════════

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ═══════════════════════════════════════════════════════════
// Session token store
// ═══════════════════════════════════════════════════════════

struct TokenSession {
    identity: Identity,
    expires_at: Instant,
}

/// In-memory bearer sessions. Only token hashes are kept.
pub struct SessionTokens {
    sessions: Mutex<HashMap<[u8; 32], TokenSession>>,
    ttl: Duration,
}

impl SessionTokens {
    /// `ttl` is capped at [`MAX_TOKEN_TTL_HOURS`] so expiry stays representable.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: ttl.min(Duration::from_secs(MAX_TOKEN_TTL_HOURS * 3600)),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<[u8; 32], TokenSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mint a new bearer token for `identity`. Returns the raw token.
    pub fn issue(&self, identity: Identity) -> String {
        let token = generate_token();
        let now = Instant::now();
        let mut sessions = self.sessions();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(
            hash_token(&token),
            TokenSession {
                identity,
                expires_at: now + self.ttl,
            },
        );
        token
    }

    /// Invalidate one token. Returns `false` if it was unknown.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions().remove(&hash_token(token)).is_some()
    }

    /// Invalidate every token held by a user. Returns how many were dropped.
    pub fn revoke_user(&self, user_id: &Uuid) -> usize {
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, s| &s.identity.id != user_id);
        before - sessions.len()
    }

    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.sessions().values().filter(|s| s.expires_at > now).count()
    }
}

impl Authenticator for SessionTokens {
    fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        let key = hash_token(credential);
        let mut sessions = self.sessions();
        let session = sessions.get(&key).ok_or(AuthError::Unauthenticated)?;

        if Instant::now() >= session.expires_at {
            sessions.remove(&key);
            return Err(AuthError::Expired);
        }
        Ok(session.identity.clone())
    }
}
