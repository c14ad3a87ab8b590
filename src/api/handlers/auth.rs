//! Login, token refresh, logout and CSRF token issuance.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::instrument;
use utoipa::ToSchema;

use crate::api::extract::{ClientInfo, Payload};
use crate::audit::{AuditEvent, AuditEventType, AuditOutcome};
use crate::error::GatewayError;
use crate::identity::{authenticator::SESSION_HEADER, AuthMethod, UserContext};
use crate::state::GatewayState;

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    /// Token lifetime in seconds.
    pub expires_in: u64,
    pub session_token: String,
    pub user: UserContext,
}

#[derive(ToSchema, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct CsrfResponse {
    pub csrf_token: String,
    pub expires_in: u64,
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Signed token and session", body = LoginResponse),
        (status = 400, description = "Missing or malformed payload"),
        (status = 413, description = "Payload over the size limit"),
        (status = 401, description = "Invalid credentials or disabled account"),
    ),
    tag = "auth",
)]
#[instrument(skip(state, request))]
pub async fn login(
    State(state): State<GatewayState>,
    client: ClientInfo,
    Payload(request): Payload<LoginRequest>,
) -> Result<Json<LoginResponse>, GatewayError> {
    let outcome = state
        .authenticator
        .login(&request.username, &request.password, client.caller())
        .await?;

    Ok(Json(LoginResponse {
        token: outcome.token,
        token_type: "Bearer",
        expires_in: outcome.expires_in.as_secs(),
        session_token: outcome.session_token,
        user: UserContext::for_user(&outcome.user, AuthMethod::Session),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "Fresh signed token", body = TokenResponse),
        (status = 401, description = "Invalid or expired token"),
    ),
    tag = "auth",
)]
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<GatewayState>,
    Payload(request): Payload<RefreshRequest>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let token = state.authenticator.refresh_token(&request.token).await?;
    Ok(Json(TokenResponse {
        token,
        token_type: "Bearer",
        expires_in: state.authenticator.tokens().ttl().as_secs(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses (
        (status = 204, description = "Session ended"),
        (status = 400, description = "Missing X-Session-Token header"),
    ),
    tag = "auth",
)]
pub async fn logout(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GatewayError> {
    let token = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| GatewayError::validation("Missing X-Session-Token header"))?;
    state.authenticator.logout(token).await;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/auth/csrf",
    responses (
        (status = 200, description = "Single-use CSRF token", body = CsrfResponse),
    ),
    tag = "auth",
)]
pub async fn csrf_token(
    State(state): State<GatewayState>,
    client: ClientInfo,
) -> Result<Json<CsrfResponse>, GatewayError> {
    let csrf = state.pipeline.csrf();
    let token = csrf
        .issue()
        .await
        .map_err(|err| GatewayError::internal(err.to_string()))?;
    state.audit.log(
        AuditEvent::new(AuditEventType::Admission, "csrf_issue", AuditOutcome::Success)
            .origin(Some(client.origin.as_str()))
            .user_agent(client.user_agent.as_deref()),
    );
    Ok(Json(CsrfResponse {
        csrf_token: token,
        expires_in: csrf.ttl().as_secs(),
    }))
}
