//! API key management for the authenticated user.
//!
//! A caller can only hand its own permissions on to a new key. Admins may
//! revoke any key; everyone else only their own.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::instrument;
use utoipa::ToSchema;

use crate::api::extract::{Authenticated, Payload};
use crate::error::GatewayError;
use crate::identity::models::{ApiKeyView, IssueKeyRequest};
use crate::identity::permission::{self, Permission, ADMIN_ROLE};
use crate::state::GatewayState;

#[derive(ToSchema, Deserialize, Debug)]
pub struct CreateKeyRequest {
    pub name: String,
    pub permissions: Vec<String>,
    /// Requests per rate-limit window for this key; `0` means no per-key limit.
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(ToSchema, Serialize)]
pub struct CreatedKey {
    /// Raw key. Shown once and never stored.
    pub key: String,
    pub api_key: ApiKeyView,
}

#[utoipa::path(
    post,
    path = "/v1/keys",
    request_body = CreateKeyRequest,
    responses (
        (status = 201, description = "Key issued", body = CreatedKey),
        (status = 400, description = "Invalid name or permission"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Permission not held by caller or quota reached"),
    ),
    tag = "keys",
)]
#[instrument(skip_all, fields(user_id = %ctx.user_id))]
pub async fn create(
    State(state): State<GatewayState>,
    Authenticated(ctx): Authenticated,
    Payload(request): Payload<CreateKeyRequest>,
) -> Result<(StatusCode, Json<CreatedKey>), GatewayError> {
    for raw in &request.permissions {
        let wanted = raw
            .parse::<Permission>()
            .map_err(|err| GatewayError::validation(err.to_string()))?;
        if !permission::can_delegate(&ctx.roles, &ctx.permissions, &wanted) {
            return Err(GatewayError::forbidden());
        }
    }

    let issued = state
        .store()
        .issue_api_key(
            &ctx.user_id,
            IssueKeyRequest {
                name: request.name,
                permissions: request.permissions,
                rate_limit: request.rate_limit,
                expires_at: request.expires_at,
                metadata: request.metadata,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedKey {
            key: issued.raw_key,
            api_key: issued.view,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/keys",
    responses (
        (status = 200, description = "Keys owned by the caller", body = [ApiKeyView]),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "keys",
)]
pub async fn list(
    State(state): State<GatewayState>,
    Authenticated(ctx): Authenticated,
) -> Json<Vec<ApiKeyView>> {
    Json(state.store().list_keys(&ctx.user_id).await)
}

#[utoipa::path(
    delete,
    path = "/v1/keys/{id}",
    params(
        ("id" = String, Path, description = "API key id"),
    ),
    responses (
        (status = 200, description = "Key revoked", body = ApiKeyView),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown key"),
    ),
    tag = "keys",
)]
#[instrument(skip(state, ctx), fields(user_id = %ctx.user_id))]
pub async fn revoke(
    State(state): State<GatewayState>,
    Authenticated(ctx): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ApiKeyView>, GatewayError> {
    let owner = if ctx.roles.iter().any(|role| role == ADMIN_ROLE) {
        None
    } else {
        Some(ctx.user_id.as_str())
    };
    let view = state.store().revoke_api_key_by_id(&id, owner).await?;
    Ok(Json(view))
}
