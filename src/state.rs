//! Wiring of the stores, the authenticator and the admission pipeline.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

use crate::admission::{rate_limit::SlidingWindowLimiter, AdmissionPipeline};
use crate::audit::AuditLogger;
use crate::config::SecurityConfig;
use crate::identity::{
    models::NewUser, session::SessionStore, token::TokenIssuer, Authenticator, IdentityStore,
};

pub const ADMIN_USERNAME: &str = "admin";
pub const API_USERNAME: &str = "api-user";

/// Options for the identities created at startup.
#[derive(Debug, Default)]
pub struct Bootstrap {
    pub admin_password: Option<SecretString>,
    pub seed_api_user: bool,
}

#[derive(Clone, Debug)]
pub struct GatewayState {
    pub config: Arc<SecurityConfig>,
    pub authenticator: Arc<Authenticator>,
    pub pipeline: Arc<AdmissionPipeline>,
    pub audit: AuditLogger,
}

impl GatewayState {
    /// # Errors
    /// Fails when the configuration does not validate.
    pub fn new(config: SecurityConfig, audit: AuditLogger) -> Result<Self> {
        config.validate().context("invalid security configuration")?;
        let secret = config.signing_secret()?;

        let store = Arc::new(
            IdentityStore::new(&config, audit.clone()).context("failed to build identity store")?,
        );
        let tokens = TokenIssuer::new(secret, config.token_issuer(), config.token_ttl());
        let sessions = SessionStore::new(config.session_ttl());
        let key_limiter = SlidingWindowLimiter::new(
            config.rate_limit_requests(),
            config.rate_limit_window(),
            config.rate_limit_max_keys(),
        );
        let authenticator = Arc::new(Authenticator::new(
            store,
            tokens,
            sessions,
            key_limiter,
            audit.clone(),
        ));
        let pipeline = Arc::new(AdmissionPipeline::new(&config, audit.clone()));

        Ok(Self {
            config: Arc::new(config),
            authenticator,
            pipeline,
            audit,
        })
    }

    #[must_use]
    pub fn store(&self) -> &IdentityStore {
        self.authenticator.store()
    }

    /// Seed the admin user and, when asked, a key-only API user.
    ///
    /// # Errors
    /// Fails when a user cannot be created.
    pub async fn bootstrap(&self, options: Bootstrap) -> Result<()> {
        if self.store().find_by_username(ADMIN_USERNAME).await.is_none() {
            let admin = self
                .store()
                .create_user(NewUser {
                    username: ADMIN_USERNAME.to_string(),
                    email: "admin@aigate.local".to_string(),
                    password: options.admin_password,
                    roles: vec!["admin".to_string(), "user".to_string()],
                    permissions: vec!["*".to_string()],
                })
                .await
                .context("failed to create admin user")?;
            info!(user_id = %admin.id, has_password = admin.has_password(), "admin user created");
        }

        if options.seed_api_user && self.store().find_by_username(API_USERNAME).await.is_none() {
            let user = self
                .store()
                .create_user(NewUser {
                    username: API_USERNAME.to_string(),
                    email: "api-user@aigate.local".to_string(),
                    password: None,
                    roles: vec!["user".to_string()],
                    permissions: vec![
                        "ai:chat".to_string(),
                        "ai:completion".to_string(),
                        "ai:models".to_string(),
                    ],
                })
                .await
                .context("failed to create api user")?;
            info!(user_id = %user.id, "api user created");
        }
        Ok(())
    }

    /// One pass over every store with expiring entries.
    pub async fn sweep(&self) -> usize {
        let admission = self.pipeline.sweep().await;
        let sessions = self.authenticator.sessions().sweep().await;
        let key_windows = self.authenticator.key_limiter().sweep().await;
        admission + sessions + key_windows
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PasswordParams;

    fn config() -> SecurityConfig {
        SecurityConfig::new()
            .with_signing_secret(SecretString::from(
                "0123456789abcdef0123456789abcdef".to_string(),
            ))
            .with_password_params(PasswordParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            })
    }

    #[test]
    fn refuses_to_start_without_secret() {
        let err = GatewayState::new(SecurityConfig::new(), AuditLogger::default()).unwrap_err();
        assert!(err.to_string().contains("invalid security configuration"));
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let state = GatewayState::new(config(), AuditLogger::default()).unwrap();
        let options = || Bootstrap {
            admin_password: Some(SecretString::from("admin-pass".to_string())),
            seed_api_user: true,
        };
        state.bootstrap(options()).await.unwrap();
        state.bootstrap(options()).await.unwrap();

        let stats = state.store().stats().await;
        assert_eq!(stats.users, 2);
        assert_eq!(stats.api_keys, 0);

        let admin = state
            .store()
            .authenticate_password(ADMIN_USERNAME, "admin-pass")
            .await
            .unwrap();
        assert!(admin.roles.contains("admin"));
        let api = state.store().find_by_username(API_USERNAME).await.unwrap();
        assert!(!api.has_password());
    }
}
