//! Single-use CSRF tokens.
//!
//! A token is valid once and only before its expiry. Validation removes the
//! token whatever the outcome, so a replayed or late token always fails.
//! Tokens shorter than [`MIN_TOKEN_LEN`] are rejected before any lookup.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::identity::crypto::{self, CryptoError};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const MIN_TOKEN_LEN: usize = 32;
const MAX_TOKEN_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CsrfError {
    #[error("CSRF token required")]
    Required,
    #[error("invalid or expired CSRF token")]
    Invalid,
}

#[derive(Debug)]
pub struct CsrfGuard {
    ttl: Duration,
    tokens: RwLock<HashMap<String, Instant>>,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token valid for the configured TTL.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if the RNG fails.
    pub async fn issue(&self) -> Result<String, CryptoError> {
        let token = crypto::generate_token()?;
        let expires_at = Instant::now() + self.ttl;
        self.tokens
            .write()
            .await
            .insert(crypto::hash_token(&token), expires_at);
        Ok(token)
    }

    /// Consume `token`.
    ///
    /// # Errors
    /// [`CsrfError::Invalid`] for malformed, unknown, reused or expired tokens.
    pub async fn validate(&self, token: &str) -> Result<(), CsrfError> {
        let token = token.trim();
        if token.len() < MIN_TOKEN_LEN || token.len() > MAX_TOKEN_LEN {
            return Err(CsrfError::Invalid);
        }
        let now = Instant::now();
        let expires_at = self
            .tokens
            .write()
            .await
            .remove(&crypto::hash_token(token))
            .ok_or(CsrfError::Invalid)?;
        if now >= expires_at {
            return Err(CsrfError::Invalid);
        }
        Ok(())
    }

    /// Drop expired tokens. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, expires_at| *expires_at > now);
        before - tokens.len()
    }

    pub async fn outstanding(&self) -> usize {
        self.tokens.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn token_validates_exactly_once() {
        let guard = CsrfGuard::new(Duration::from_secs(600));
        let token = guard.issue().await.unwrap();
        assert_eq!(guard.validate(&token).await, Ok(()));
        assert_eq!(guard.validate(&token).await, Err(CsrfError::Invalid));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_fails_and_is_removed() {
        let guard = CsrfGuard::new(Duration::from_secs(600));
        let token = guard.issue().await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(guard.validate(&token).await, Err(CsrfError::Invalid));
        assert_eq!(guard.outstanding().await, 0);
    }

    #[tokio::test]
    async fn short_or_unknown_tokens_fail() {
        let guard = CsrfGuard::new(Duration::from_secs(600));
        assert_eq!(guard.validate("invalid-token").await, Err(CsrfError::Invalid));
        assert_eq!(
            guard.validate(&"a".repeat(MIN_TOKEN_LEN)).await,
            Err(CsrfError::Invalid)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_expired_only() {
        let guard = CsrfGuard::new(Duration::from_secs(600));
        guard.issue().await.unwrap();
        tokio::time::advance(Duration::from_secs(300)).await;
        let fresh = guard.issue().await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(guard.sweep().await, 1);
        assert_eq!(guard.validate(&fresh).await, Ok(()));
    }
}
