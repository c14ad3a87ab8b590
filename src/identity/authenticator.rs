//! Credential extraction, authentication and authorization facade.
//!
//! ## Flow Overview
//! 1) `extract_credential` reads `Authorization: Bearer`, `X-API-Key` or
//!    `X-Session-Token`. A bearer value with the API key prefix is an API key;
//!    anything else is treated as a signed token.
//! 2) `authenticate` screens the raw value, resolves it to a [`UserContext`]
//!    and applies the key's own rate limit when it has one.
//! 3) `authorize` evaluates the context against a `(resource, action)` pair.
//!
//! Every terminal outcome is audited. Revoked and unknown API keys produce the
//! same error code.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::models::{AuthMethod, User, UserContext};
use super::permission;
use super::session::{Session, SessionError, SessionStore};
use super::store::{IdentityError, IdentityStore};
use super::token::{TokenError, TokenIssuer};
use crate::admission::inspect::{inspect_credential, inspect_signed_token};
use crate::admission::rate_limit::{RateLimitDecision, SlidingWindowLimiter};
use crate::audit::{AuditEvent, AuditEventType, AuditLogger, AuditOutcome};
use crate::error::{codes, GatewayError};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const SESSION_HEADER: &str = "x-session-token";

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    Token(String),
    Session(String),
}

impl Credential {
    // Signed tokens carry the claim lists, so they get the wider length cap.
    fn screen(&self) -> Result<(), GatewayError> {
        match self {
            Self::Token(raw) => inspect_signed_token(raw),
            Self::ApiKey(raw) | Self::Session(raw) => inspect_credential(raw),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => "api_key",
            Self::Token(_) => "token",
            Self::Session(_) => "session",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(***)", self.kind())
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Pull a credential out of the request headers.
#[must_use]
pub fn extract_credential(headers: &HeaderMap, key_prefix: &str) -> Option<Credential> {
    if let Some(value) = header_value(headers, AUTHORIZATION.as_str()) {
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());
        if let Some(token) = token {
            return Some(if token.starts_with(key_prefix) {
                Credential::ApiKey(token.to_string())
            } else {
                Credential::Token(token.to_string())
            });
        }
    }
    if let Some(key) = header_value(headers, API_KEY_HEADER) {
        return Some(Credential::ApiKey(key.to_string()));
    }
    header_value(headers, SESSION_HEADER).map(|token| Credential::Session(token.to_string()))
}

/// Successful password login.
#[derive(Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub token: String,
    pub expires_in: Duration,
    pub session_token: String,
    pub session: Session,
}

/// Request context used for audit fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct Caller<'a> {
    pub origin: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

pub struct Authenticator {
    store: Arc<IdentityStore>,
    tokens: TokenIssuer,
    sessions: SessionStore,
    key_limiter: SlidingWindowLimiter,
    audit: AuditLogger,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    #[must_use]
    pub fn new(
        store: Arc<IdentityStore>,
        tokens: TokenIssuer,
        sessions: SessionStore,
        key_limiter: SlidingWindowLimiter,
        audit: AuditLogger,
    ) -> Self {
        Self {
            store,
            tokens,
            sessions,
            key_limiter,
            audit,
        }
    }

    #[must_use]
    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn key_limiter(&self) -> &SlidingWindowLimiter {
        &self.key_limiter
    }

    /// Resolve a credential to the calling user.
    ///
    /// # Errors
    /// `Security` for screened input, `Authentication` for anything that does
    /// not resolve to an active identity, `RateLimit` when the API key's own
    /// quota is spent.
    #[instrument(skip_all, fields(kind = credential.kind()))]
    pub async fn authenticate(
        &self,
        credential: &Credential,
        caller: Caller<'_>,
    ) -> Result<UserContext, GatewayError> {
        let result = self.resolve(credential).await;
        let event = match &result {
            Ok(ctx) => AuditEvent::new(
                AuditEventType::Authentication,
                credential.kind(),
                AuditOutcome::Success,
            )
            .user(ctx.user_id.as_str()),
            Err(err) => AuditEvent::new(
                AuditEventType::Authentication,
                credential.kind(),
                AuditOutcome::Failure,
            )
            .detail("code", err.code()),
        };
        self.audit
            .log(event.origin(caller.origin).user_agent(caller.user_agent));
        result
    }

    async fn resolve(&self, credential: &Credential) -> Result<UserContext, GatewayError> {
        credential.screen()?;
        match credential {
            Credential::ApiKey(raw) => self.resolve_api_key(raw).await,
            Credential::Token(raw) => {
                let claims = self.tokens.validate(raw).map_err(token_error)?;
                Ok(UserContext {
                    user_id: claims.user_id,
                    username: claims.username,
                    roles: claims.roles,
                    permissions: claims.permissions,
                    method: AuthMethod::Token,
                    api_key_id: None,
                })
            }
            Credential::Session(raw) => {
                let session = self.sessions.validate(raw).await.map_err(|err| match err {
                    SessionError::Expired => {
                        GatewayError::authentication(codes::SESSION_EXPIRED, "Session expired")
                    }
                    SessionError::Invalid => {
                        GatewayError::authentication(codes::INVALID_SESSION, "Invalid session")
                    }
                })?;
                let user = self
                    .store
                    .get_user(&session.user_id)
                    .await
                    .ok_or_else(|| {
                        GatewayError::authentication(codes::INVALID_SESSION, "Invalid session")
                    })?;
                if !user.active {
                    return Err(IdentityError::AccountDisabled.into());
                }
                Ok(UserContext::for_user(&user, AuthMethod::Session))
            }
        }
    }

    async fn resolve_api_key(&self, raw: &str) -> Result<UserContext, GatewayError> {
        let (user, record) = self
            .store
            .validate_api_key(raw)
            .await
            .map_err(|err| match err {
                IdentityError::InvalidCredential | IdentityError::NotFound => {
                    GatewayError::authentication(codes::INVALID_API_KEY, "Invalid API key")
                }
                other => other.into(),
            })?;

        if record.rate_limit > 0 {
            if let RateLimitDecision::Limited { retry_after } = self
                .key_limiter
                .check_with_limit(&record.id, record.rate_limit)
                .await
            {
                debug!(key_id = %record.id, "API key rate limit reached");
                return Err(GatewayError::rate_limited(
                    codes::RATE_LIMIT_EXCEEDED,
                    "API key rate limit exceeded",
                    retry_after,
                ));
            }
        }
        Ok(UserContext::for_api_key(&user, &record))
    }

    /// Authenticate straight from request headers.
    ///
    /// # Errors
    /// `Authentication` (`missing_token`) when no credential is present, else
    /// as [`Authenticator::authenticate`].
    pub async fn authenticate_headers(
        &self,
        headers: &HeaderMap,
        caller: Caller<'_>,
    ) -> Result<UserContext, GatewayError> {
        let Some(credential) = extract_credential(headers, self.store.key_prefix()) else {
            self.audit.log(
                AuditEvent::new(
                    AuditEventType::Authentication,
                    "missing",
                    AuditOutcome::Failure,
                )
                .origin(caller.origin)
                .user_agent(caller.user_agent),
            );
            return Err(GatewayError::authentication(
                codes::MISSING_TOKEN,
                "Authentication required",
            ));
        };
        self.authenticate(&credential, caller).await
    }

    /// Decide and audit whether `ctx` may perform `action` on `resource`.
    pub fn authorize(&self, ctx: &UserContext, resource: &str, action: &str) -> bool {
        let allowed = permission::authorize(&ctx.roles, &ctx.permissions, resource, action);
        self.audit.log(
            AuditEvent::new(
                AuditEventType::Authorization,
                format!("{resource}:{action}"),
                if allowed {
                    AuditOutcome::Success
                } else {
                    AuditOutcome::Failure
                },
            )
            .resource(resource)
            .user(ctx.user_id.as_str()),
        );
        allowed
    }

    /// [`Authenticator::authorize`] as a `Result`.
    ///
    /// # Errors
    /// `Authorization` (`insufficient_permissions`) when denied.
    pub fn require(
        &self,
        ctx: &UserContext,
        resource: &str,
        action: &str,
    ) -> Result<(), GatewayError> {
        if self.authorize(ctx, resource, action) {
            Ok(())
        } else {
            Err(GatewayError::forbidden())
        }
    }

    /// Password login: verifies the password, mints a signed token and opens a
    /// session.
    ///
    /// # Errors
    /// `Authentication` for bad credentials or a disabled account, `Internal`
    /// when signing or token generation fails.
    #[instrument(skip(self, password, caller))]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        caller: Caller<'_>,
    ) -> Result<LoginOutcome, GatewayError> {
        let user = self
            .store
            .authenticate_password(username, password)
            .await
            .map_err(GatewayError::from)?;
        let token = self.tokens.issue(&user).map_err(token_error)?;
        let (session_token, session) = self
            .sessions
            .create(
                &user.id,
                caller.origin.map(ToString::to_string),
                caller.user_agent.map(ToString::to_string),
            )
            .await
            .map_err(|err| GatewayError::internal(err.to_string()))?;

        self.audit.log(
            AuditEvent::new(AuditEventType::Session, "create", AuditOutcome::Success)
                .user(user.id.as_str())
                .origin(caller.origin)
                .user_agent(caller.user_agent)
                .detail("session_id", &session.id),
        );
        Ok(LoginOutcome {
            user,
            token,
            expires_in: self.tokens.ttl(),
            session_token,
            session,
        })
    }

    /// Reissue a signed token for a still valid token of an active user.
    ///
    /// # Errors
    /// `Authentication` when the token is invalid or the user is gone or
    /// disabled.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, token: &str) -> Result<String, GatewayError> {
        inspect_signed_token(token)?;
        let claims = self.tokens.validate(token).map_err(token_error)?;
        let user = self
            .store
            .get_user(&claims.user_id)
            .await
            .ok_or_else(|| GatewayError::authentication(codes::INVALID_TOKEN, "Invalid token"))?;
        if !user.active {
            return Err(IdentityError::AccountDisabled.into());
        }
        let fresh = self.tokens.issue(&user).map_err(token_error)?;
        self.audit.log(
            AuditEvent::new(AuditEventType::Authentication, "refresh", AuditOutcome::Success)
                .user(user.id.as_str()),
        );
        Ok(fresh)
    }

    /// End a session. Unknown tokens are ignored.
    pub async fn logout(&self, session_token: &str) -> bool {
        let destroyed = self.sessions.destroy(session_token).await;
        self.audit.log(AuditEvent::new(
            AuditEventType::Session,
            "destroy",
            if destroyed {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failure
            },
        ));
        destroyed
    }
}

fn token_error(err: TokenError) -> GatewayError {
    match err {
        TokenError::Expired => GatewayError::authentication(codes::CREDENTIAL_EXPIRED, "Token expired"),
        TokenError::Internal(detail) => GatewayError::internal(detail),
        TokenError::Malformed | TokenError::BadSignature | TokenError::NotYetValid => {
            GatewayError::authentication(codes::INVALID_TOKEN, "Invalid token")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::admission::inspect::MAX_CREDENTIAL_LEN;
    use crate::audit::MemoryAuditSink;
    use crate::config::{PasswordParams, SecurityConfig};
    use crate::error::ErrorKind;
    use crate::identity::models::{IssueKeyRequest, NewUser};
    use axum::http::HeaderValue;
    use secrecy::SecretString;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    async fn setup() -> (Authenticator, User, Arc<MemoryAuditSink>) {
        let config = SecurityConfig::new()
            .with_signing_secret(SecretString::from(SECRET.to_string()))
            .with_password_params(PasswordParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            });
        let sink = Arc::new(MemoryAuditSink::new());
        let audit = AuditLogger::new(sink.clone());
        let store = Arc::new(IdentityStore::new(&config, audit.clone()).unwrap());
        let user = store
            .create_user(NewUser {
                username: "u1".to_string(),
                email: "u1@example.com".to_string(),
                password: Some(SecretString::from("pa55word".to_string())),
                roles: vec!["user".to_string()],
                permissions: vec!["ai:chat".to_string()],
            })
            .await
            .unwrap();
        let auth = Authenticator::new(
            store,
            TokenIssuer::new(
                &SecretString::from(SECRET.to_string()),
                "ai-gateway",
                Duration::from_secs(3600),
            ),
            SessionStore::new(Duration::from_secs(3600)),
            SlidingWindowLimiter::new(60, Duration::from_secs(60), 1000),
            audit,
        );
        (auth, user, sink)
    }

    #[test]
    fn extraction_rules() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_credential(&headers, "gw-"), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer gw-abc"));
        assert_eq!(
            extract_credential(&headers, "gw-"),
            Some(Credential::ApiKey("gw-abc".to_string()))
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer eyJ.x.y"));
        assert_eq!(
            extract_credential(&headers, "gw-"),
            Some(Credential::Token("eyJ.x.y".to_string()))
        );

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("gw-def"));
        assert_eq!(
            extract_credential(&headers, "gw-"),
            Some(Credential::ApiKey("gw-def".to_string()))
        );

        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("sess"));
        assert_eq!(
            extract_credential(&headers, "gw-"),
            Some(Credential::Session("sess".to_string()))
        );
    }

    #[test]
    fn credential_debug_hides_value() {
        let rendered = format!("{:?}", Credential::ApiKey("gw-secret".to_string()));
        assert!(!rendered.contains("gw-secret"));
    }

    #[tokio::test]
    async fn api_key_end_to_end() {
        let (auth, user, _) = setup().await;
        let issued = auth
            .store()
            .issue_api_key(
                &user.id,
                IssueKeyRequest {
                    name: "ci".to_string(),
                    permissions: vec!["ai:chat".to_string()],
                    ..IssueKeyRequest::default()
                },
            )
            .await
            .unwrap();

        let credential = Credential::ApiKey(issued.raw_key.clone());
        let ctx = auth
            .authenticate(&credential, Caller::default())
            .await
            .unwrap();
        assert_eq!(ctx.user_id, user.id);
        assert_eq!(ctx.method, AuthMethod::ApiKey);
        assert!(auth.authorize(&ctx, "ai", "chat"));
        assert!(!auth.authorize(&ctx, "ai", "embeddings"));
        assert_eq!(
            auth.require(&ctx, "ai", "embeddings").unwrap_err().kind(),
            ErrorKind::Authorization
        );

        auth.store().revoke_api_key(&issued.raw_key).await.unwrap();
        let revoked = auth
            .authenticate(&credential, Caller::default())
            .await
            .unwrap_err();
        let unknown = auth
            .authenticate(
                &Credential::ApiKey(format!("gw-{}", "0".repeat(64))),
                Caller::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(revoked.kind(), ErrorKind::Authentication);
        assert_eq!(revoked.code(), codes::INVALID_API_KEY);
        assert_eq!(revoked, unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn per_key_rate_limit() {
        let (auth, user, _) = setup().await;
        let issued = auth
            .store()
            .issue_api_key(
                &user.id,
                IssueKeyRequest {
                    name: "limited".to_string(),
                    permissions: vec!["ai:chat".to_string()],
                    rate_limit: 2,
                    ..IssueKeyRequest::default()
                },
            )
            .await
            .unwrap();
        let credential = Credential::ApiKey(issued.raw_key);
        for _ in 0..2 {
            assert!(auth.authenticate(&credential, Caller::default()).await.is_ok());
        }
        let err = auth
            .authenticate(&credential, Caller::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn login_token_and_session() {
        let (auth, user, sink) = setup().await;
        let outcome = auth
            .login("u1", "pa55word", Caller::default())
            .await
            .unwrap();
        assert_eq!(outcome.user.id, user.id);

        let ctx = auth
            .authenticate(&Credential::Token(outcome.token.clone()), Caller::default())
            .await
            .unwrap();
        assert_eq!(ctx.method, AuthMethod::Token);
        assert!(auth.authorize(&ctx, "ai", "chat"));

        let ctx = auth
            .authenticate(
                &Credential::Session(outcome.session_token.clone()),
                Caller::default(),
            )
            .await
            .unwrap();
        assert_eq!(ctx.method, AuthMethod::Session);

        assert!(auth.logout(&outcome.session_token).await);
        let err = auth
            .authenticate(&Credential::Session(outcome.session_token), Caller::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_SESSION);

        let rendered = serde_json::to_string(&sink.events()).unwrap();
        assert!(!rendered.contains(&outcome.token));
        assert!(!rendered.contains("pa55word"));
    }

    #[tokio::test]
    async fn tokens_with_many_permissions_authenticate() {
        let (auth, _, _) = setup().await;
        let permissions = [
            "ai:chat",
            "ai:completion",
            "ai:models",
            "ai:embeddings",
            "models:list",
            "models:read",
            "usage:read",
            "keys:create",
            "keys:list",
            "keys:revoke",
        ];
        auth.store()
            .create_user(NewUser {
                username: "power-user".to_string(),
                email: "power@example.com".to_string(),
                password: Some(SecretString::from("pa55word".to_string())),
                roles: vec!["user".to_string(), "operator".to_string()],
                permissions: permissions.iter().map(ToString::to_string).collect(),
            })
            .await
            .unwrap();

        let outcome = auth
            .login("power-user", "pa55word", Caller::default())
            .await
            .unwrap();
        assert!(outcome.token.len() > MAX_CREDENTIAL_LEN);

        let ctx = auth
            .authenticate(&Credential::Token(outcome.token.clone()), Caller::default())
            .await
            .unwrap();
        assert!(auth.authorize(&ctx, "usage", "read"));

        let fresh = auth.refresh_token(&outcome.token).await.unwrap();
        assert!(auth
            .authenticate(&Credential::Token(fresh), Caller::default())
            .await
            .is_ok());

        let err = auth
            .authenticate(
                &Credential::ApiKey(format!("gw-{}", "a".repeat(MAX_CREDENTIAL_LEN))),
                Caller::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::SUSPICIOUS_INPUT);
    }

    #[tokio::test]
    async fn refresh_requires_active_user() {
        let (auth, user, _) = setup().await;
        let outcome = auth
            .login("u1", "pa55word", Caller::default())
            .await
            .unwrap();
        let fresh = auth.refresh_token(&outcome.token).await.unwrap();
        assert!(auth.tokens().validate(&fresh).is_ok());

        auth.store().set_user_active(&user.id, false).await.unwrap();
        let err = auth.refresh_token(&outcome.token).await.unwrap_err();
        assert_eq!(err.code(), codes::ACCOUNT_DISABLED);
    }

    #[tokio::test]
    async fn bad_inputs() {
        let (auth, _, _) = setup().await;
        let err = auth
            .authenticate(&Credential::Token("garbage".to_string()), Caller::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_TOKEN);

        let err = auth
            .authenticate(
                &Credential::ApiKey("gw-<script>".to_string()),
                Caller::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);

        let err = auth
            .authenticate_headers(&HeaderMap::new(), Caller::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::MISSING_TOKEN);

        let err = auth
            .login("u1", "nope", Caller::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), codes::INVALID_CREDENTIALS);
    }
}
