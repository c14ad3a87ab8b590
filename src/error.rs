//! Error taxonomy shared by the admission pipeline, identity operations and the
//! HTTP surface.
//!
//! Every rejection carries an [`ErrorKind`] (drives the status code and the
//! envelope `type`) and a stable machine-readable `code`. Internal failures keep
//! their detail in the server log and leave the process as an opaque 500.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::error;

/// Stable error codes returned in the `code` field of the envelope.
pub mod codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const REQUEST_TOO_LARGE: &str = "request_too_large";
    pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
    pub const ORIGIN_BANNED: &str = "rate_limited";
    pub const CSRF_REQUIRED: &str = "csrf_token_required";
    pub const CSRF_INVALID: &str = "csrf_token_invalid";
    pub const MISSING_TOKEN: &str = "missing_token";
    pub const INVALID_API_KEY: &str = "invalid_api_key";
    pub const INVALID_TOKEN: &str = "invalid_token";
    pub const INVALID_SESSION: &str = "invalid_session";
    pub const INVALID_CREDENTIALS: &str = "invalid_credentials";
    pub const CREDENTIAL_EXPIRED: &str = "credential_expired";
    pub const SESSION_EXPIRED: &str = "session_expired";
    pub const ACCOUNT_DISABLED: &str = "account_disabled";
    pub const INSUFFICIENT_PERMISSIONS: &str = "insufficient_permissions";
    pub const SUSPICIOUS_INPUT: &str = "suspicious_input";
    pub const NOT_FOUND: &str = "not_found";
    pub const API_KEY_QUOTA_EXCEEDED: &str = "api_key_quota_exceeded";
    pub const CONFLICT: &str = "conflict";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    RateLimit,
    Csrf,
    RequestTooLarge,
    Security,
    NotFound,
    QuotaExceeded,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Validation | Self::Security => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization | Self::Csrf | Self::QuotaExceeded => StatusCode::FORBIDDEN,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `type` field in the error envelope.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Authentication => "authentication_error",
            Self::Authorization | Self::QuotaExceeded => "authorization_error",
            Self::RateLimit => "rate_limit_error",
            Self::Csrf => "csrf_error",
            Self::RequestTooLarge | Self::Security => "security_error",
            Self::NotFound => "not_found_error",
            Self::Internal => "internal_error",
        }
    }
}

/// Terminal rejection produced by any stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    retry_after: Option<u64>,
}

impl GatewayError {
    #[must_use]
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, codes::INVALID_REQUEST, message)
    }

    #[must_use]
    pub fn authentication(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, code, message)
    }

    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(
            ErrorKind::Authorization,
            codes::INSUFFICIENT_PERMISSIONS,
            "Insufficient permissions",
        )
    }

    #[must_use]
    pub fn rate_limited(code: &'static str, message: impl Into<String>, retry: Duration) -> Self {
        let mut err = Self::new(ErrorKind::RateLimit, code, message);
        // Round up so clients never retry a second too early.
        let secs = retry.as_secs() + u64::from(retry.subsec_nanos() > 0);
        err.retry_after = Some(secs.max(1));
        err
    }

    #[must_use]
    pub fn csrf(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Csrf, code, message)
    }

    #[must_use]
    pub fn too_large(limit: u64) -> Self {
        Self::new(
            ErrorKind::RequestTooLarge,
            codes::REQUEST_TOO_LARGE,
            format!("Request body too large. Maximum size: {limit} bytes"),
        )
    }

    #[must_use]
    pub fn suspicious(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, codes::SUSPICIOUS_INPUT, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, codes::NOT_FOUND, message)
    }

    /// Internal failure. The detail is kept for the server log only.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, codes::INTERNAL, detail)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Message safe to show to the client.
    #[must_use]
    pub fn public_message(&self) -> &str {
        if self.kind == ErrorKind::Internal {
            "Internal server error"
        } else {
            &self.message
        }
    }

    /// `{"error": {"message", "type", "code"}}`
    #[must_use]
    pub fn envelope(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.public_message(),
                "type": self.kind.type_name(),
                "code": self.code,
            }
        })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::Internal {
            error!(code = self.code, "internal error: {}", self.message);
        }

        let mut response = (self.status(), Json(self.envelope())).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(ErrorKind::RequestTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ErrorKind::RateLimit.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::Csrf.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::Authorization.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::Authentication.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn envelope_shape() {
        let err = GatewayError::authentication(codes::INVALID_API_KEY, "Invalid API key");
        let body = err.envelope();
        assert_eq!(body["error"]["message"], "Invalid API key");
        assert_eq!(body["error"]["type"], "authentication_error");
        assert_eq!(body["error"]["code"], "invalid_api_key");
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = GatewayError::internal("argon2 backend exploded");
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(err.envelope()["error"]["code"], codes::INTERNAL);
        assert_eq!(err.message(), "argon2 backend exploded");
    }

    #[test]
    fn retry_after_rounds_up() {
        let err = GatewayError::rate_limited(
            codes::RATE_LIMIT_EXCEEDED,
            "Rate limit exceeded",
            Duration::from_millis(1500),
        );
        assert_eq!(err.retry_after(), Some(2));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("2")
        );
    }
}
