//! Time-bounded sessions.
//!
//! The raw session token is returned once by [`SessionStore::create`]; the map is
//! keyed by its SHA-256 so a dump of the store does not yield usable tokens.
//! Sessions are purely time-bounded: there is no refresh chaining. Expired
//! entries are inert on read and removed by [`SessionStore::sweep`].

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::crypto::{self, CryptoError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session")]
    Invalid,
    #[error("session expired")]
    Expired,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub data: BTreeMap<String, String>,
    expires_at: Instant,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session and return the raw token with its record.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if the token cannot be generated.
    pub async fn create(
        &self,
        user_id: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(String, Session), CryptoError> {
        let token = crypto::generate_token()?;
        let session = Session {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            ip_address,
            user_agent,
            data: BTreeMap::new(),
            expires_at: Instant::now() + self.ttl,
        };
        self.sessions
            .write()
            .await
            .insert(crypto::hash_token(&token), session.clone());
        Ok((token, session))
    }

    /// Look up a live session. An expired one is removed and reported as such.
    ///
    /// # Errors
    /// [`SessionError::Invalid`] for unknown tokens, [`SessionError::Expired`]
    /// once the TTL has elapsed.
    pub async fn validate(&self, token: &str) -> Result<Session, SessionError> {
        let key = crypto::hash_token(token);
        {
            let sessions = self.sessions.read().await;
            match sessions.get(&key) {
                None => return Err(SessionError::Invalid),
                Some(session) if !session.is_expired(Instant::now()) => {
                    return Ok(session.clone());
                }
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        // Re-check under the write lock; a concurrent destroy may have won.
        match sessions.get(&key) {
            Some(session) if session.is_expired(Instant::now()) => {
                sessions.remove(&key);
                Err(SessionError::Expired)
            }
            Some(session) => Ok(session.clone()),
            None => Err(SessionError::Invalid),
        }
    }

    /// Remove a session. Returns whether it existed.
    pub async fn destroy(&self, token: &str) -> bool {
        self.sessions
            .write()
            .await
            .remove(&crypto::hash_token(token))
            .is_some()
    }

    /// Drop expired sessions, returning how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
