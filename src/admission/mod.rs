//! Request admission pipeline.
//!
//! ## Flow Overview
//! Every request passes these stages in order; the first rejection ends it:
//! 1) Size limit on the declared `Content-Length` (413).
//! 2) Brute-force guard: a banned origin is refused (429). The outcome of the
//!    downstream handler is fed back afterwards: `401` counts as a failure,
//!    `2xx` clears the origin.
//! 3) Sliding-window rate limit per origin (429).
//! 4) CSRF: `POST`/`PUT`/`PATCH`/`DELETE` must carry a fresh single-use
//!    `X-CSRF-Token` (403).
//! 5) Security headers on the admitted response.
//!
//! Stages fail closed and can be switched off individually. The pipeline owns
//! each stage's state; nothing here is global.

pub mod brute_force;
pub mod client;
pub mod csrf;
pub mod headers;
pub mod inspect;
pub mod rate_limit;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use self::{
    brute_force::BruteForceGuard,
    csrf::{CsrfError, CsrfGuard, CSRF_HEADER},
    headers::SecurityHeaders,
    rate_limit::{RateLimitDecision, SlidingWindowLimiter},
};
use crate::audit::{AuditEvent, AuditEventType, AuditLogger, AuditOutcome};
use crate::config::{SecurityConfig, StageToggles};
use crate::error::{codes, GatewayError};

/// What the pipeline needs to know about a request.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub content_length: Option<u64>,
    pub origin: String,
    pub user_agent: Option<String>,
    pub csrf_token: Option<String>,
}

impl RequestMeta {
    #[must_use]
    pub fn from_parts(
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Self {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            method: method.clone(),
            path: path.to_string(),
            content_length: header_str(header::CONTENT_LENGTH.as_str())
                .and_then(|value| value.parse().ok()),
            origin: client::resolve_client_origin(headers, peer),
            user_agent: header_str(header::USER_AGENT.as_str()),
            csrf_token: header_str(CSRF_HEADER),
        }
    }

    #[must_use]
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

#[derive(Debug)]
pub struct AdmissionPipeline {
    stages: StageToggles,
    max_request_bytes: u64,
    rate_limiter: SlidingWindowLimiter,
    brute_force: BruteForceGuard,
    csrf: CsrfGuard,
    headers: SecurityHeaders,
    audit: AuditLogger,
}

impl AdmissionPipeline {
    #[must_use]
    pub fn new(config: &SecurityConfig, audit: AuditLogger) -> Self {
        Self {
            stages: config.stages(),
            max_request_bytes: config.max_request_bytes(),
            rate_limiter: SlidingWindowLimiter::new(
                config.rate_limit_requests(),
                config.rate_limit_window(),
                config.rate_limit_max_keys(),
            ),
            brute_force: BruteForceGuard::new(
                config.brute_force_threshold(),
                config.brute_force_lockout(),
            ),
            csrf: CsrfGuard::new(config.csrf_ttl()),
            headers: SecurityHeaders::new(config.hsts_max_age()),
            audit,
        }
    }

    #[must_use]
    pub fn stages(&self) -> StageToggles {
        self.stages
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    #[must_use]
    pub fn brute_force(&self) -> &BruteForceGuard {
        &self.brute_force
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &SlidingWindowLimiter {
        &self.rate_limiter
    }

    /// Run the rejection stages for one request.
    ///
    /// # Errors
    /// The first stage that refuses the request decides the error.
    pub async fn admit(&self, meta: &RequestMeta) -> Result<(), GatewayError> {
        let result = self.run_stages(meta).await;
        if let Err((stage, err)) = &result {
            self.audit.log(
                AuditEvent::new(AuditEventType::Admission, *stage, AuditOutcome::Failure)
                    .resource(meta.path.as_str())
                    .origin(Some(meta.origin.as_str()))
                    .user_agent(meta.user_agent.as_deref())
                    .detail("method", &meta.method)
                    .detail("code", err.code()),
            );
        }
        result.map_err(|(_, err)| err)
    }

    async fn run_stages(&self, meta: &RequestMeta) -> Result<(), (&'static str, GatewayError)> {
        if self.stages.size_limit {
            if let Some(length) = meta.content_length {
                if length > self.max_request_bytes {
                    return Err(("size_limit", GatewayError::too_large(self.max_request_bytes)));
                }
            }
        }

        if self.stages.brute_force {
            if let Some(remaining) = self.brute_force.check(&meta.origin).await {
                return Err((
                    "brute_force",
                    GatewayError::rate_limited(
                        codes::ORIGIN_BANNED,
                        "Too many failed attempts. Please try again later.",
                        remaining,
                    ),
                ));
            }
        }

        if self.stages.rate_limit {
            if let RateLimitDecision::Limited { retry_after } =
                self.rate_limiter.check(&meta.origin).await
            {
                return Err((
                    "rate_limit",
                    GatewayError::rate_limited(
                        codes::RATE_LIMIT_EXCEEDED,
                        "Rate limit exceeded",
                        retry_after,
                    ),
                ));
            }
        }

        if self.stages.csrf && meta.is_state_changing() {
            let Some(token) = meta.csrf_token.as_deref() else {
                return Err((
                    "csrf",
                    GatewayError::csrf(codes::CSRF_REQUIRED, CsrfError::Required.to_string()),
                ));
            };
            if let Err(err) = self.csrf.validate(token).await {
                return Err(("csrf", GatewayError::csrf(codes::CSRF_INVALID, err.to_string())));
            }
        }

        Ok(())
    }

    /// Audit the admitted request with its final status and feed that status
    /// back into the brute-force guard.
    pub async fn record_outcome(&self, meta: &RequestMeta, status: StatusCode) {
        self.audit.log(
            AuditEvent::new(AuditEventType::Admission, "admitted", AuditOutcome::Success)
                .resource(meta.path.as_str())
                .origin(Some(meta.origin.as_str()))
                .user_agent(meta.user_agent.as_deref())
                .detail("method", &meta.method)
                .detail("status", status.as_u16()),
        );

        if !self.stages.brute_force {
            return;
        }
        if status == StatusCode::UNAUTHORIZED {
            if let Some(lockout) = self.brute_force.record_failure(&meta.origin).await {
                self.audit.log(
                    AuditEvent::new(AuditEventType::Admission, "ban", AuditOutcome::Success)
                        .origin(Some(meta.origin.as_str()))
                        .user_agent(meta.user_agent.as_deref())
                        .detail("lockout_secs", lockout.as_secs()),
                );
            }
        } else if status.is_success() {
            self.brute_force.record_success(&meta.origin).await;
        }
    }

    /// Add the hardening headers to an admitted response.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        if self.stages.security_headers {
            self.headers.apply(headers);
        }
    }

    /// Prune expired CSRF tokens, idle rate windows and stale bans.
    pub async fn sweep(&self) -> usize {
        let csrf = self.csrf.sweep().await;
        let windows = self.rate_limiter.sweep().await;
        let bans = self.brute_force.sweep().await;
        debug!(csrf, windows, bans, "admission sweep");
        csrf + windows + bans
    }
}

/// Axum middleware mounting the pipeline in front of every route.
pub async fn admission_middleware(
    State(pipeline): State<Arc<AdmissionPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let meta = RequestMeta::from_parts(
        request.method(),
        request.uri().path(),
        request.headers(),
        peer,
    );

    if let Err(err) = pipeline.admit(&meta).await {
        return err.into_response();
    }

    let mut response = next.run(request).await;
    pipeline.record_outcome(&meta, response.status()).await;
    pipeline.apply_headers(response.headers_mut());
    response
}
