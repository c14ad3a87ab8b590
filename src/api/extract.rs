//! Request extractors shared by the handlers.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{header::USER_AGENT, request::Parts, StatusCode},
    Json,
};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::admission::client::resolve_client_origin;
use crate::error::GatewayError;
use crate::identity::{Caller, UserContext};
use crate::state::GatewayState;

/// Where the request came from, for audit fields.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub origin: String,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Self {
            origin: resolve_client_origin(&parts.headers, peer),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string),
        }
    }

    #[must_use]
    pub fn caller(&self) -> Caller<'_> {
        Caller {
            origin: Some(&self.origin),
            user_agent: self.user_agent.as_deref(),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// The authenticated caller. Rejects with the authentication error envelope.
#[derive(Clone, Debug)]
pub struct Authenticated(pub UserContext);

#[async_trait]
impl FromRequestParts<GatewayState> for Authenticated {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &GatewayState,
    ) -> Result<Self, Self::Rejection> {
        let client = ClientInfo::from_parts(parts);
        let ctx = state
            .authenticator
            .authenticate_headers(&parts.headers, client.caller())
            .await?;
        Ok(Self(ctx))
    }
}

/// JSON request body. Rejections use the gateway error envelope, and a body
/// over the size limit is a `413` like the admission size stage.
#[derive(Clone, Debug)]
pub struct Payload<T>(pub T);

#[async_trait]
impl<T> FromRequest<GatewayState> for Payload<T>
where
    T: DeserializeOwned,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &GatewayState) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(payload_error(
                &rejection,
                state.config.max_request_bytes(),
            )),
        }
    }
}

fn payload_error(rejection: &JsonRejection, limit: u64) -> GatewayError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => GatewayError::validation("Missing payload"),
        _ if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => GatewayError::too_large(limit),
        _ => GatewayError::validation(format!("Invalid payload: {}", rejection.body_text())),
    }
}
