//! Security configuration for identity and admission.
//!
//! All knobs have conservative defaults except the token signing secret, which
//! has none: a gateway without an explicit secret refuses to start, see
//! [`SecurityConfig::validate`].

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 24 * 60 * 60;
pub const DEFAULT_TOKEN_ISSUER: &str = "ai-gateway";
pub const DEFAULT_API_KEY_PREFIX: &str = "gw-";
pub const DEFAULT_MAX_API_KEYS_PER_USER: usize = 10;
pub const DEFAULT_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 60;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_MAX_KEYS: usize = 100_000;
pub const DEFAULT_BRUTE_FORCE_THRESHOLD: u32 = 5;
pub const DEFAULT_BRUTE_FORCE_LOCKOUT_SECONDS: u64 = 15 * 60;
pub const DEFAULT_CSRF_TTL_SECONDS: u64 = 10 * 60;
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 12 * 60 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_SWEEP_GRACE_SECONDS: u64 = 5;
pub const MIN_SIGNING_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("token signing secret is not configured")]
    MissingSigningSecret,
    #[error("token signing secret must be at least {MIN_SIGNING_SECRET_BYTES} bytes")]
    WeakSigningSecret,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("API key prefix must be ASCII without whitespace, end in '-' or '_' and not start like a signed token")]
    InvalidKeyPrefix,
}

/// Argon2id cost parameters for password hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordParams {
    fn default() -> Self {
        // OWASP baseline for argon2id.
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Which admission stages are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageToggles {
    pub size_limit: bool,
    pub brute_force: bool,
    pub rate_limit: bool,
    pub csrf: bool,
    pub security_headers: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            size_limit: true,
            brute_force: true,
            rate_limit: true,
            csrf: true,
            security_headers: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    signing_secret: Option<SecretString>,
    token_ttl: Duration,
    token_issuer: String,
    api_key_prefix: String,
    max_api_keys_per_user: usize,
    max_request_bytes: u64,
    rate_limit_requests: u32,
    rate_limit_window: Duration,
    rate_limit_max_keys: usize,
    brute_force_threshold: u32,
    brute_force_lockout: Duration,
    csrf_ttl: Duration,
    session_ttl: Duration,
    hsts_max_age: u64,
    stages: StageToggles,
    sweep_interval: Duration,
    sweep_grace: Duration,
    password_params: PasswordParams,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            signing_secret: None,
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECONDS),
            token_issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            api_key_prefix: DEFAULT_API_KEY_PREFIX.to_string(),
            max_api_keys_per_user: DEFAULT_MAX_API_KEYS_PER_USER,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            rate_limit_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            rate_limit_max_keys: DEFAULT_RATE_LIMIT_MAX_KEYS,
            brute_force_threshold: DEFAULT_BRUTE_FORCE_THRESHOLD,
            brute_force_lockout: Duration::from_secs(DEFAULT_BRUTE_FORCE_LOCKOUT_SECONDS),
            csrf_ttl: Duration::from_secs(DEFAULT_CSRF_TTL_SECONDS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            hsts_max_age: 0,
            stages: StageToggles::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
            sweep_grace: Duration::from_secs(DEFAULT_SWEEP_GRACE_SECONDS),
            password_params: PasswordParams::default(),
        }
    }

    #[must_use]
    pub fn with_signing_secret(mut self, secret: SecretString) -> Self {
        self.signing_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_token_issuer(mut self, issuer: String) -> Self {
        self.token_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_api_key_prefix(mut self, prefix: String) -> Self {
        self.api_key_prefix = prefix;
        self
    }

    #[must_use]
    pub fn with_max_api_keys_per_user(mut self, max: usize) -> Self {
        self.max_api_keys_per_user = max;
        self
    }

    #[must_use]
    pub fn with_max_request_bytes(mut self, bytes: u64) -> Self {
        self.max_request_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests: u32, window: Duration) -> Self {
        self.rate_limit_requests = requests;
        self.rate_limit_window = window;
        self
    }

    #[must_use]
    pub fn with_rate_limit_max_keys(mut self, max_keys: usize) -> Self {
        self.rate_limit_max_keys = max_keys;
        self
    }

    #[must_use]
    pub fn with_brute_force(mut self, threshold: u32, lockout: Duration) -> Self {
        self.brute_force_threshold = threshold;
        self.brute_force_lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_csrf_ttl(mut self, ttl: Duration) -> Self {
        self.csrf_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_hsts_max_age(mut self, seconds: u64) -> Self {
        self.hsts_max_age = seconds;
        self
    }

    #[must_use]
    pub fn with_stages(mut self, stages: StageToggles) -> Self {
        self.stages = stages;
        self
    }

    #[must_use]
    pub fn with_sweep(mut self, interval: Duration, grace: Duration) -> Self {
        self.sweep_interval = interval;
        self.sweep_grace = grace;
        self
    }

    #[must_use]
    pub fn with_password_params(mut self, params: PasswordParams) -> Self {
        self.password_params = params;
        self
    }

    /// Check the configuration before anything is constructed from it.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the signing secret is missing or shorter
    /// than [`MIN_SIGNING_SECRET_BYTES`], or when a window, TTL or quota is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = self
            .signing_secret
            .as_ref()
            .ok_or(ConfigError::MissingSigningSecret)?;
        if secret.expose_secret().len() < MIN_SIGNING_SECRET_BYTES {
            return Err(ConfigError::WeakSigningSecret);
        }
        if self.rate_limit_requests == 0 {
            return Err(ConfigError::Zero("rate limit requests"));
        }
        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::Zero("rate limit window"));
        }
        if self.csrf_ttl.is_zero() {
            return Err(ConfigError::Zero("CSRF token TTL"));
        }
        if self.max_api_keys_per_user == 0 {
            return Err(ConfigError::Zero("max API keys per user"));
        }
        if self.token_ttl.is_zero() {
            return Err(ConfigError::Zero("token TTL"));
        }
        if self.session_ttl.is_zero() {
            return Err(ConfigError::Zero("session TTL"));
        }
        if !valid_key_prefix(&self.api_key_prefix) {
            return Err(ConfigError::InvalidKeyPrefix);
        }
        Ok(())
    }

    /// Signing secret, or [`ConfigError::MissingSigningSecret`].
    ///
    /// # Errors
    /// Fails when no secret was configured.
    pub fn signing_secret(&self) -> Result<&SecretString, ConfigError> {
        self.signing_secret
            .as_ref()
            .ok_or(ConfigError::MissingSigningSecret)
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    #[must_use]
    pub fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    #[must_use]
    pub fn api_key_prefix(&self) -> &str {
        &self.api_key_prefix
    }

    #[must_use]
    pub fn max_api_keys_per_user(&self) -> usize {
        self.max_api_keys_per_user
    }

    #[must_use]
    pub fn max_request_bytes(&self) -> u64 {
        self.max_request_bytes
    }

    #[must_use]
    pub fn rate_limit_requests(&self) -> u32 {
        self.rate_limit_requests
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    #[must_use]
    pub fn rate_limit_max_keys(&self) -> usize {
        self.rate_limit_max_keys
    }

    #[must_use]
    pub fn brute_force_threshold(&self) -> u32 {
        self.brute_force_threshold
    }

    #[must_use]
    pub fn brute_force_lockout(&self) -> Duration {
        self.brute_force_lockout
    }

    #[must_use]
    pub fn csrf_ttl(&self) -> Duration {
        self.csrf_ttl
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn hsts_max_age(&self) -> u64 {
        self.hsts_max_age
    }

    #[must_use]
    pub fn stages(&self) -> StageToggles {
        self.stages
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub fn sweep_grace(&self) -> Duration {
        self.sweep_grace
    }

    #[must_use]
    pub fn password_params(&self) -> PasswordParams {
        self.password_params
    }
}

// Signed tokens start with the base64url of `{"`, so a prefix must not, and
// the trailing separator keeps key and token namespaces apart.
fn valid_key_prefix(prefix: &str) -> bool {
    prefix.len() > 1
        && prefix.ends_with(['-', '_'])
        && !prefix.starts_with("eyJ")
        && prefix.chars().all(|c| c.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn missing_secret_fails_validation() {
        let config = SecurityConfig::new();
        assert_eq!(config.validate(), Err(ConfigError::MissingSigningSecret));
        assert!(config.signing_secret().is_err());
    }

    #[test]
    fn short_secret_fails_validation() {
        let config = SecurityConfig::new().with_signing_secret(secret("too-short"));
        assert_eq!(config.validate(), Err(ConfigError::WeakSigningSecret));
    }

    #[test]
    fn defaults_validate_with_secret() {
        let config = SecurityConfig::new()
            .with_signing_secret(secret("0123456789abcdef0123456789abcdef"));
        assert!(config.validate().is_ok());
        assert_eq!(config.api_key_prefix(), "gw-");
        assert_eq!(config.max_api_keys_per_user(), 10);
        assert_eq!(config.token_issuer(), "ai-gateway");
        assert_eq!(config.brute_force_threshold(), 5);
        assert_eq!(config.brute_force_lockout(), Duration::from_secs(900));
        assert_eq!(config.hsts_max_age(), 0);
        assert_eq!(config.stages(), StageToggles::default());
    }

    #[test]
    fn zero_values_are_rejected() {
        let base = SecurityConfig::new()
            .with_signing_secret(secret("0123456789abcdef0123456789abcdef"));

        let config = base.clone().with_rate_limit(10, Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::Zero("rate limit window")));

        let config = base.clone().with_csrf_ttl(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::Zero("CSRF token TTL")));

        let config = base.clone().with_max_api_keys_per_user(0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("max API keys per user"))
        );

        for prefix in ["", "g w-", "gw", "eyJ", "eyJ-", "-"] {
            let config = base.clone().with_api_key_prefix(prefix.to_string());
            assert_eq!(config.validate(), Err(ConfigError::InvalidKeyPrefix), "{prefix:?}");
        }
        for prefix in ["gw-", "sk_", "ai-gw-"] {
            let config = base.clone().with_api_key_prefix(prefix.to_string());
            assert!(config.validate().is_ok(), "{prefix:?}");
        }
    }

    #[test]
    fn debug_does_not_print_secret() {
        let config = SecurityConfig::new()
            .with_signing_secret(secret("super-secret-signing-key-0123456789"));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-signing-key"));
    }
}
