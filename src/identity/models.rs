//! Identity records kept by the store and the redacted views handed out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;

/// Number of hash characters shown in [`ApiKeyView`].
pub const HASH_PREFIX_LEN: usize = 10;

#[derive(Clone, Debug)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub(crate) password_hash: Option<String>,
}

impl User {
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Input for [`super::store::IdentityStore::create_user`].
#[derive(Clone, Debug, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: Option<secrecy::SecretString>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ApiKeyRecord {
    pub id: String,
    pub key_hash: String,
    pub name: String,
    pub user_id: String,
    pub permissions: Vec<String>,
    /// Requests per rate-limit window; `0` means only the per-origin limit applies.
    pub rate_limit: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl ApiKeyRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn view(&self) -> ApiKeyView {
        let prefix: String = self.key_hash.chars().take(HASH_PREFIX_LEN).collect();
        ApiKeyView {
            id: self.id.clone(),
            name: self.name.clone(),
            key_hash: format!("{prefix}..."),
            user_id: self.user_id.clone(),
            permissions: self.permissions.clone(),
            rate_limit: self.rate_limit,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// API key metadata safe to return to clients.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ApiKeyView {
    pub id: String,
    pub name: String,
    /// First characters of the stored hash followed by `...`.
    pub key_hash: String,
    pub user_id: String,
    pub permissions: Vec<String>,
    pub rate_limit: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct IssueKeyRequest {
    pub name: String,
    pub permissions: Vec<String>,
    pub rate_limit: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

/// Result of issuance: the only place the raw key ever appears.
#[derive(Clone)]
pub struct IssuedKey {
    pub raw_key: String,
    pub view: ApiKeyView,
}

impl std::fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedKey")
            .field("raw_key", &"***")
            .field("view", &self.view)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    Token,
    Session,
}

/// Authenticated caller attached to a request.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct UserContext {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
}

impl UserContext {
    /// Context for a user authenticated by token, session or password.
    #[must_use]
    pub fn for_user(user: &User, method: AuthMethod) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            roles: user.roles.iter().cloned().collect(),
            permissions: user.permissions.iter().cloned().collect(),
            method,
            api_key_id: None,
        }
    }

    /// Context for an API key: the key's permissions with the owner's roles.
    #[must_use]
    pub fn for_api_key(user: &User, key: &ApiKeyRecord) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            roles: user.roles.iter().cloned().collect(),
            permissions: key.permissions.clone(),
            method: AuthMethod::ApiKey,
            api_key_id: Some(key.id.clone()),
        }
    }
}
