//! Users, API keys, signed tokens, sessions and permission checks.

pub mod authenticator;
pub mod crypto;
pub mod models;
pub mod permission;
pub mod session;
pub mod store;
pub mod token;

pub use self::authenticator::{extract_credential, Authenticator, Caller, Credential};
pub use self::models::{AuthMethod, UserContext};
pub use self::store::{IdentityError, IdentityStore};
