//! Identity store: users and API key records behind one reader/writer lock.
//!
//! ## Flow Overview
//! 1) `issue_api_key` generates the raw key outside the lock, then checks the
//!    owner and the quota and inserts the salted hash under the write lock.
//! 2) `validate_api_key` resolves the hash under the read lock. The
//!    `last_used_at` stamp is applied afterwards under the write lock and only
//!    touches a record that is still present, so a concurrent revoke always wins.
//! 3) `authenticate_password` runs Argon2 on the blocking pool against the
//!    stored hash, or a dummy hash when the username is unknown.
//!
//! Revoked and unknown keys fail with the same error. Raw keys and passwords
//! never reach the audit trail.

use chrono::Utc;
use regex::Regex;
use secrecy::ExposeSecret;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use ulid::Ulid;

use super::crypto::{self, CryptoError, PasswordHasher};
use super::models::{ApiKeyRecord, ApiKeyView, IssueKeyRequest, IssuedKey, NewUser, User};
use super::permission;
use crate::audit::{AuditEvent, AuditEventType, AuditLogger, AuditOutcome};
use crate::config::SecurityConfig;
use crate::error::{codes, ErrorKind, GatewayError};

const MAX_NAME_LEN: usize = 128;

fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("not found")]
    NotFound,
    #[error("API key quota of {0} reached")]
    QuotaExceeded(usize),
    #[error("invalid credentials")]
    InvalidCredential,
    #[error("credential expired")]
    Expired,
    #[error("account disabled")]
    AccountDisabled,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Internal(String),
}

impl From<CryptoError> for IdentityError {
    fn from(err: CryptoError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<IdentityError> for GatewayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotFound => Self::not_found("Not found"),
            IdentityError::QuotaExceeded(max) => Self::new(
                ErrorKind::QuotaExceeded,
                codes::API_KEY_QUOTA_EXCEEDED,
                format!("Maximum number of API keys ({max}) reached"),
            ),
            IdentityError::InvalidCredential => {
                Self::authentication(codes::INVALID_CREDENTIALS, "Invalid credentials")
            }
            IdentityError::Expired => {
                Self::authentication(codes::CREDENTIAL_EXPIRED, "Credential expired")
            }
            IdentityError::AccountDisabled => {
                Self::authentication(codes::ACCOUNT_DISABLED, "Account disabled")
            }
            IdentityError::Conflict(message) => {
                Self::new(ErrorKind::Validation, codes::CONFLICT, message)
            }
            IdentityError::Validation(message) => Self::validation(message),
            IdentityError::Internal(detail) => Self::internal(detail),
        }
    }
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    usernames: HashMap<String, String>,
    api_keys: HashMap<String, ApiKeyRecord>,
    key_ids: HashMap<String, String>,
}

impl Inner {
    fn active_key_count(&self, user_id: &str) -> usize {
        let now = Utc::now();
        self.api_keys
            .values()
            .filter(|key| key.user_id == user_id && !key.is_expired(now))
            .count()
    }

    fn remove_key(&mut self, hash: &str) -> Option<ApiKeyRecord> {
        let record = self.api_keys.remove(hash)?;
        self.key_ids.remove(&record.id);
        Some(record)
    }
}

/// Counts exposed on the health endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub users: usize,
    pub api_keys: usize,
}

pub struct IdentityStore {
    inner: RwLock<Inner>,
    hasher: Arc<PasswordHasher>,
    key_salt: [u8; 32],
    key_prefix: String,
    max_keys_per_user: usize,
    audit: AuditLogger,
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("key_prefix", &self.key_prefix)
            .field("max_keys_per_user", &self.max_keys_per_user)
            .finish_non_exhaustive()
    }
}

impl IdentityStore {
    /// # Errors
    /// Fails when the signing secret is missing or the password hasher cannot
    /// be built from the configured parameters.
    pub fn new(config: &SecurityConfig, audit: AuditLogger) -> Result<Self, IdentityError> {
        let secret = config
            .signing_secret()
            .map_err(|err| IdentityError::Internal(err.to_string()))?;
        let hasher = PasswordHasher::new(config.password_params())?;
        Ok(Self {
            inner: RwLock::new(Inner::default()),
            hasher: Arc::new(hasher),
            key_salt: crypto::derive_key_salt(secret.expose_secret().as_bytes()),
            key_prefix: config.api_key_prefix().to_string(),
            max_keys_per_user: config.max_api_keys_per_user(),
            audit,
        })
    }

    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Hash a password on the blocking pool.
    async fn hash_password(&self, password: String) -> Result<String, IdentityError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| IdentityError::Internal(format!("password hashing task failed: {err}")))?
            .map_err(IdentityError::from)
    }

    /// Register a user.
    ///
    /// # Errors
    /// [`IdentityError::Validation`] for an empty username, a malformed email
    /// or permission, [`IdentityError::Conflict`] when the username is taken.
    #[instrument(skip(self, new_user), fields(username = %new_user.username))]
    pub async fn create_user(&self, new_user: NewUser) -> Result<User, IdentityError> {
        let username = new_user.username.trim().to_string();
        if username.is_empty() {
            return Err(IdentityError::Validation("username is required".to_string()));
        }
        let email = new_user.email.trim().to_string();
        if !valid_email(&email) {
            return Err(IdentityError::Validation(format!("invalid email: {email}")));
        }
        permission::validate_all(&new_user.permissions)
            .map_err(|err| IdentityError::Validation(err.to_string()))?;

        let password_hash = match new_user.password {
            Some(password) => Some(
                self.hash_password(password.expose_secret().to_string())
                    .await?,
            ),
            None => None,
        };

        let user = User {
            id: Ulid::new().to_string(),
            username: username.clone(),
            email,
            roles: new_user.roles.into_iter().collect::<BTreeSet<_>>(),
            permissions: new_user.permissions.into_iter().collect::<BTreeSet<_>>(),
            active: true,
            created_at: Utc::now(),
            last_login: None,
            password_hash,
        };

        let mut inner = self.inner.write().await;
        if inner.usernames.contains_key(&username) {
            drop(inner);
            self.audit.log(
                AuditEvent::new(AuditEventType::User, "create", AuditOutcome::Failure)
                    .detail("username", &username)
                    .detail("reason", "username taken"),
            );
            return Err(IdentityError::Conflict(format!(
                "username {username} already exists"
            )));
        }
        inner.usernames.insert(username.clone(), user.id.clone());
        inner.users.insert(user.id.clone(), user.clone());
        drop(inner);

        self.audit.log(
            AuditEvent::new(AuditEventType::User, "create", AuditOutcome::Success)
                .user(&user.id)
                .detail("username", &username),
        );
        Ok(user)
    }

    /// Enable or disable a user. Disabled users fail every authentication.
    ///
    /// # Errors
    /// [`IdentityError::NotFound`] for an unknown user.
    pub async fn set_user_active(&self, user_id: &str, active: bool) -> Result<(), IdentityError> {
        let mut inner = self.inner.write().await;
        let user = inner.users.get_mut(user_id).ok_or(IdentityError::NotFound)?;
        user.active = active;
        drop(inner);

        self.audit.log(
            AuditEvent::new(
                AuditEventType::User,
                if active { "enable" } else { "disable" },
                AuditOutcome::Success,
            )
            .user(user_id),
        );
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        self.inner.read().await.users.get(user_id).cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<User> {
        let inner = self.inner.read().await;
        inner
            .usernames
            .get(username)
            .and_then(|id| inner.users.get(id))
            .cloned()
    }

    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            users: inner.users.len(),
            api_keys: inner.api_keys.len(),
        }
    }

    /// Mint an API key for `user_id`. The raw key is only in the return value.
    ///
    /// # Errors
    /// [`IdentityError::NotFound`] for an unknown user,
    /// [`IdentityError::QuotaExceeded`] once the user holds the maximum number
    /// of unexpired keys, [`IdentityError::Validation`] for a bad name or
    /// permission, [`IdentityError::Internal`] if the RNG fails or the hash
    /// collides with an existing record.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn issue_api_key(
        &self,
        user_id: &str,
        request: IssueKeyRequest,
    ) -> Result<IssuedKey, IdentityError> {
        let name = request.name.trim().to_string();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(IdentityError::Validation(format!(
                "key name must be 1 to {MAX_NAME_LEN} characters"
            )));
        }
        permission::validate_all(&request.permissions)
            .map_err(|err| IdentityError::Validation(err.to_string()))?;

        let raw_key = crypto::generate_api_key(&self.key_prefix)?;
        let key_hash = crypto::hash_api_key(&self.key_salt, &raw_key);

        let mut inner = self.inner.write().await;
        let result = Self::insert_key(
            &mut inner,
            user_id,
            name,
            key_hash,
            request,
            self.max_keys_per_user,
        );
        drop(inner);

        match result {
            Ok(record) => {
                self.audit.log(
                    AuditEvent::new(AuditEventType::ApiKey, "issue", AuditOutcome::Success)
                        .resource("api_key")
                        .user(user_id)
                        .detail("key_id", &record.id)
                        .detail("key_name", &record.name),
                );
                Ok(IssuedKey {
                    raw_key,
                    view: record.view(),
                })
            }
            Err(err) => {
                self.audit.log(
                    AuditEvent::new(AuditEventType::ApiKey, "issue", AuditOutcome::Failure)
                        .resource("api_key")
                        .user(user_id)
                        .detail("reason", &err),
                );
                Err(err)
            }
        }
    }

    fn insert_key(
        inner: &mut Inner,
        user_id: &str,
        name: String,
        key_hash: String,
        request: IssueKeyRequest,
        max_keys: usize,
    ) -> Result<ApiKeyRecord, IdentityError> {
        let user = inner.users.get(user_id).ok_or(IdentityError::NotFound)?;
        if inner.active_key_count(user_id) >= max_keys {
            return Err(IdentityError::QuotaExceeded(max_keys));
        }
        if inner.api_keys.contains_key(&key_hash) {
            return Err(IdentityError::Internal("API key hash collision".to_string()));
        }

        let mut metadata = request.metadata;
        metadata.insert("user_email".to_string(), user.email.clone());
        metadata.insert(
            "user_roles".to_string(),
            user.roles.iter().cloned().collect::<Vec<_>>().join(","),
        );

        let record = ApiKeyRecord {
            id: Ulid::new().to_string(),
            key_hash: key_hash.clone(),
            name,
            user_id: user_id.to_string(),
            permissions: request.permissions,
            rate_limit: request.rate_limit,
            created_at: Utc::now(),
            expires_at: request.expires_at,
            last_used_at: None,
            metadata,
        };
        inner.key_ids.insert(record.id.clone(), key_hash.clone());
        inner.api_keys.insert(key_hash, record.clone());
        Ok(record)
    }

    /// Resolve a raw key to its owner and record.
    ///
    /// # Errors
    /// [`IdentityError::InvalidCredential`] for unknown or revoked keys,
    /// [`IdentityError::Expired`] past `expires_at`,
    /// [`IdentityError::AccountDisabled`] when the owner is inactive.
    #[instrument(skip_all)]
    pub async fn validate_api_key(
        &self,
        raw_key: &str,
    ) -> Result<(User, ApiKeyRecord), IdentityError> {
        if !raw_key.starts_with(&self.key_prefix) {
            return Err(IdentityError::InvalidCredential);
        }
        let key_hash = crypto::hash_api_key(&self.key_salt, raw_key);
        let now = Utc::now();

        let (user, mut record) = {
            let inner = self.inner.read().await;
            let record = inner
                .api_keys
                .get(&key_hash)
                .ok_or(IdentityError::InvalidCredential)?;
            if !crypto::constant_time_eq(record.key_hash.as_bytes(), key_hash.as_bytes()) {
                return Err(IdentityError::InvalidCredential);
            }
            if record.is_expired(now) {
                return Err(IdentityError::Expired);
            }
            let user = inner
                .users
                .get(&record.user_id)
                .ok_or(IdentityError::InvalidCredential)?;
            if !user.active {
                return Err(IdentityError::AccountDisabled);
            }
            (user.clone(), record.clone())
        };

        // Stamp only a record that still exists; a revoke in between wins.
        let mut inner = self.inner.write().await;
        match inner.api_keys.get_mut(&key_hash) {
            Some(live) if live.id == record.id => {
                live.last_used_at = Some(now);
                record.last_used_at = Some(now);
            }
            _ => debug!(key_id = %record.id, "key revoked during validation, skipping last_used_at"),
        }
        drop(inner);

        Ok((user, record))
    }

    /// Revoke by raw key.
    ///
    /// # Errors
    /// [`IdentityError::NotFound`] when no record matches.
    #[instrument(skip_all)]
    pub async fn revoke_api_key(&self, raw_key: &str) -> Result<(), IdentityError> {
        let key_hash = crypto::hash_api_key(&self.key_salt, raw_key);
        let removed = self.inner.write().await.remove_key(&key_hash);
        match removed {
            Some(record) => {
                self.audit.log(
                    AuditEvent::new(AuditEventType::ApiKey, "revoke", AuditOutcome::Success)
                        .resource("api_key")
                        .user(&record.user_id)
                        .detail("key_id", &record.id),
                );
                Ok(())
            }
            None => {
                self.audit.log(
                    AuditEvent::new(AuditEventType::ApiKey, "revoke", AuditOutcome::Failure)
                        .resource("api_key")
                        .detail("reason", "unknown key"),
                );
                Err(IdentityError::NotFound)
            }
        }
    }

    /// Revoke by key id. With `owner` set, keys of other users are reported as
    /// not found.
    ///
    /// # Errors
    /// [`IdentityError::NotFound`] for an unknown id or a foreign key.
    pub async fn revoke_api_key_by_id(
        &self,
        key_id: &str,
        owner: Option<&str>,
    ) -> Result<ApiKeyView, IdentityError> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .key_ids
            .get(key_id)
            .cloned()
            .filter(|hash| {
                owner.map_or(true, |owner| {
                    inner
                        .api_keys
                        .get(hash)
                        .is_some_and(|record| record.user_id == owner)
                })
            })
            .and_then(|hash| inner.remove_key(&hash));
        drop(inner);

        match removed {
            Some(record) => {
                self.audit.log(
                    AuditEvent::new(AuditEventType::ApiKey, "revoke", AuditOutcome::Success)
                        .resource("api_key")
                        .user(&record.user_id)
                        .detail("key_id", &record.id),
                );
                Ok(record.view())
            }
            None => {
                warn!(key_id, "revoke for unknown or foreign key");
                self.audit.log(
                    AuditEvent::new(AuditEventType::ApiKey, "revoke", AuditOutcome::Failure)
                        .resource("api_key")
                        .detail("key_id", key_id)
                        .detail("reason", "unknown key"),
                );
                Err(IdentityError::NotFound)
            }
        }
    }

    /// Redacted key metadata for `user_id`, oldest first.
    pub async fn list_keys(&self, user_id: &str) -> Vec<ApiKeyView> {
        let inner = self.inner.read().await;
        let mut keys: Vec<ApiKeyView> = inner
            .api_keys
            .values()
            .filter(|key| key.user_id == user_id)
            .map(ApiKeyRecord::view)
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        keys
    }

    /// Verify a username/password pair.
    ///
    /// # Errors
    /// [`IdentityError::InvalidCredential`] for an unknown user, a user without
    /// a password or a wrong password; [`IdentityError::AccountDisabled`] for an
    /// inactive user with the right password.
    #[instrument(skip(self, password))]
    pub async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, IdentityError> {
        let candidate = self.find_by_username(username).await;
        let stored = candidate.as_ref().and_then(|user| user.password_hash.clone());

        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let verified =
            tokio::task::spawn_blocking(move || hasher.verify(&password, stored.as_deref()))
                .await
                .map_err(|err| {
                    IdentityError::Internal(format!("password verification task failed: {err}"))
                })?;

        let user = match candidate {
            Some(user) if verified => user,
            _ => {
                self.audit.log(
                    AuditEvent::new(
                        AuditEventType::Authentication,
                        "password",
                        AuditOutcome::Failure,
                    )
                    .detail("username", username)
                    .detail("reason", "invalid credentials"),
                );
                return Err(IdentityError::InvalidCredential);
            }
        };

        if !user.active {
            self.audit.log(
                AuditEvent::new(
                    AuditEventType::Authentication,
                    "password",
                    AuditOutcome::Failure,
                )
                .user(&user.id)
                .detail("reason", "account disabled"),
            );
            return Err(IdentityError::AccountDisabled);
        }

        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let user = match inner.users.get_mut(&user.id) {
            Some(live) => {
                live.last_login = Some(now);
                live.clone()
            }
            None => return Err(IdentityError::InvalidCredential),
        };
        drop(inner);

        self.audit.log(
            AuditEvent::new(
                AuditEventType::Authentication,
                "password",
                AuditOutcome::Success,
            )
            .user(&user.id),
        );
        Ok(user)
    }
}
