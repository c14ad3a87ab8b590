//! Secure primitives: password hashing, random credentials and constant-time
//! comparison.
//!
//! Passwords are hashed with Argon2id. Random tokens carry 256 bits from the OS
//! RNG. API keys and opaque tokens are stored as SHA-256 digests; API keys are
//! additionally salted with a server-held value so a leaked table cannot be
//! matched against keys from another deployment.

use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash,
    PasswordHasher as _, PasswordVerifier as _, Version,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::PasswordParams;

/// Random bytes behind every generated token and API key.
pub const TOKEN_BYTES: usize = 32;

const API_KEY_SALT_LABEL: &[u8] = b"aigate/api-key-salt/v1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("secure random source failed: {0}")]
    Rng(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Argon2id hasher with a precomputed dummy hash for absent users.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    dummy_hash: String,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl PasswordHasher {
    /// # Errors
    /// Returns [`CryptoError::Hash`] when the cost parameters are rejected.
    pub fn new(params: PasswordParams) -> Result<Self, CryptoError> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|err| CryptoError::Hash(err.to_string()))?;

        let mut hasher = Self {
            params,
            dummy_hash: String::new(),
        };
        let filler = generate_token()?;
        hasher.dummy_hash = hasher.hash(&filler)?;
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string with a fresh salt.
    ///
    /// # Errors
    /// Returns [`CryptoError::Hash`] if Argon2 fails.
    pub fn hash(&self, password: &str) -> Result<String, CryptoError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| CryptoError::Hash(err.to_string()))
    }

    /// Verify a password against a stored PHC string.
    ///
    /// `None` verifies against the dummy hash and always returns `false`, so a
    /// missing user costs the same as a wrong password.
    #[must_use]
    pub fn verify(&self, password: &str, stored: Option<&str>) -> bool {
        let (candidate, real) = match stored {
            Some(hash) => (hash, true),
            None => (self.dummy_hash.as_str(), false),
        };
        let Ok(parsed) = PasswordHash::new(candidate) else {
            return false;
        };
        let ok = self
            .argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();
        ok && real
    }
}

fn random_bytes() -> Result<[u8; TOKEN_BYTES], CryptoError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| CryptoError::Rng(err.to_string()))?;
    Ok(bytes)
}

/// 256-bit random token, base64url without padding.
///
/// # Errors
/// Returns [`CryptoError::Rng`] if the OS RNG fails.
pub fn generate_token() -> Result<String, CryptoError> {
    Ok(Base64UrlUnpadded::encode_string(&random_bytes()?))
}

/// `prefix` followed by 64 lowercase hex characters.
///
/// # Errors
/// Returns [`CryptoError::Rng`] if the OS RNG fails.
pub fn generate_api_key(prefix: &str) -> Result<String, CryptoError> {
    let bytes = random_bytes()?;
    Ok(format!("{prefix}{}", hex::encode(bytes)))
}

/// Derive the API key salt from the token signing secret.
#[must_use]
pub fn derive_key_salt(secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(API_KEY_SALT_LABEL);
    hasher.update(secret);
    hasher.finalize().into()
}

/// Salted SHA-256 of a raw API key, hex encoded.
#[must_use]
pub fn hash_api_key(salt: &[u8], raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of an opaque token (sessions, CSRF), hex encoded.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare two secrets without short-circuiting on the first differing byte.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn light_params() -> PasswordParams {
        PasswordParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn password_round_trip() {
        let hasher = PasswordHasher::new(light_params()).unwrap();
        let hash = hasher.hash("correct horse").unwrap();
        assert!(hasher.verify("correct horse", Some(&hash)));
        assert!(!hasher.verify("battery staple", Some(&hash)));
    }

    #[test]
    fn password_hashes_are_salted() {
        let hasher = PasswordHasher::new(light_params()).unwrap();
        let first = hasher.hash("same").unwrap();
        let second = hasher.hash("same").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$argon2id$"));
    }

    #[test]
    fn missing_hash_never_verifies() {
        let hasher = PasswordHasher::new(light_params()).unwrap();
        assert!(!hasher.verify("anything", None));
        assert!(!hasher.verify("anything", Some("not-a-phc-string")));
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_ne!(a, b);
        // 32 bytes base64url unpadded
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn api_keys_carry_prefix() {
        let key = generate_api_key("gw-").unwrap();
        assert!(key.starts_with("gw-"));
        assert_eq!(key.len(), 3 + 64);
        assert!(key[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_hash_depends_on_salt() {
        let a = hash_api_key(b"salt-a", "gw-abc");
        let b = hash_api_key(b"salt-b", "gw-abc");
        assert_ne!(a, b);
        assert_eq!(a, hash_api_key(b"salt-a", "gw-abc"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn token_hash_is_lowercase_hex() {
        let digest = hash_token("session-token");
        assert_eq!(digest.len(), 64);
        assert_eq!(hex::decode(&digest).unwrap().len(), 32);
        assert_eq!(digest, digest.to_ascii_lowercase());
    }

    #[test]
    fn constant_time_eq_matches_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
