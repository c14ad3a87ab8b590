//! Client-origin resolution for rate limiting and lockout.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Origin key used when neither proxy headers nor a peer address are known.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Resolve the request origin: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the transport peer address.
#[must_use]
pub fn resolve_client_origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    extract_forwarded_ip(headers)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
