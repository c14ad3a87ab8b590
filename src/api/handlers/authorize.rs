use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::extract::Authenticated;
use crate::error::GatewayError;
use crate::identity::AuthMethod;
use crate::state::GatewayState;

#[derive(ToSchema, Serialize, Debug)]
pub struct Decision {
    pub allowed: bool,
    pub user_id: String,
    pub method: AuthMethod,
    pub resource: String,
    pub action: String,
}

#[utoipa::path(
    get,
    path = "/v1/authorize/{resource}/{action}",
    params(
        ("resource" = String, Path, description = "Resource, e.g. `ai`"),
        ("action" = String, Path, description = "Action, e.g. `chat`"),
    ),
    responses (
        (status = 200, description = "Caller may perform the action", body = Decision),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Insufficient permissions"),
        (status = 429, description = "Rate limited"),
    ),
    tag = "authorize",
)]
/// Check the caller's credential against a `(resource, action)` pair.
pub async fn authorize(
    State(state): State<GatewayState>,
    Authenticated(ctx): Authenticated,
    Path((resource, action)): Path<(String, String)>,
) -> Result<Json<Decision>, GatewayError> {
    state.authenticator.require(&ctx, &resource, &action)?;
    Ok(Json(Decision {
        allowed: true,
        user_id: ctx.user_id,
        method: ctx.method,
        resource,
        action,
    }))
}
