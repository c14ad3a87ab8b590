//! # Aigate (Identity & Request Admission)
//!
//! `aigate` sits in front of local and third-party model backends and decides,
//! for every inbound call, whether it may be forwarded.
//!
//! ## Admission
//!
//! Every request runs through a fixed chain before any credential is looked at:
//!
//! 1. **Size limit** on the declared body length (`413`).
//! 2. **Brute-force guard**: origins with too many consecutive authentication
//!    failures are banned for the lockout window (`429`).
//! 3. **Rate limit**: strict sliding-window count per origin (`429`).
//! 4. **CSRF**: single-use tokens on `POST`/`PUT`/`PATCH`/`DELETE` (`403`).
//! 5. **Security headers** on the response path.
//!
//! Each stage fails closed and can be toggled off in [`config::SecurityConfig`].
//!
//! ## Identity
//!
//! Credentials are `Authorization: Bearer <api-key|jwt>` or `X-API-Key`. API keys
//! carry a static prefix (`gw-` by default) and are stored only as a salted hash;
//! the raw key is returned once at issuance. Signed tokens are HS256 and the
//! signing secret must be configured: the service refuses to start without it.
//!
//! ## Authorization
//!
//! Permissions are `"*"`, `"resource:*"` or `"resource:action"`; the `admin` role
//! grants everything. See [`identity::permission`].
//!
//! All state is in memory. Each store owns its lock and is passed explicitly;
//! there is no global mutable state.

pub mod admission;
pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod state;
pub mod sweep;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
