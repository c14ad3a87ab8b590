use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{security::*, ARG_PORT};
use crate::config::{SecurityConfig, StageToggles, DEFAULT_SWEEP_GRACE_SECONDS};
use crate::state::Bootstrap;
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

fn seconds(matches: &clap::ArgMatches, id: &str) -> Option<Duration> {
    matches.get_one::<u64>(id).copied().map(Duration::from_secs)
}

/// Build the security configuration from parsed arguments.
///
/// # Errors
/// Returns an error if the signing secret is missing or the configuration
/// does not validate.
pub fn security_config(matches: &clap::ArgMatches) -> Result<SecurityConfig> {
    let secret = matches
        .get_one::<String>(ARG_JWT_SECRET)
        .cloned()
        .context("missing required argument: --jwt-secret")?;

    let mut config = SecurityConfig::new().with_signing_secret(SecretString::from(secret));

    if let Some(ttl) = seconds(matches, ARG_TOKEN_TTL) {
        config = config.with_token_ttl(ttl);
    }
    if let Some(issuer) = matches.get_one::<String>(ARG_TOKEN_ISSUER) {
        config = config.with_token_issuer(issuer.clone());
    }
    if let Some(prefix) = matches.get_one::<String>(ARG_API_KEY_PREFIX) {
        config = config.with_api_key_prefix(prefix.clone());
    }
    if let Some(max) = matches.get_one::<usize>(ARG_MAX_API_KEYS) {
        config = config.with_max_api_keys_per_user(*max);
    }
    if let Some(bytes) = matches.get_one::<u64>(ARG_MAX_REQUEST_BYTES) {
        config = config.with_max_request_bytes(*bytes);
    }
    if let (Some(requests), Some(window)) = (
        matches.get_one::<u32>(ARG_RATE_LIMIT_REQUESTS),
        seconds(matches, ARG_RATE_LIMIT_WINDOW),
    ) {
        config = config.with_rate_limit(*requests, window);
    }
    if let (Some(threshold), Some(lockout)) = (
        matches.get_one::<u32>(ARG_BRUTE_FORCE_THRESHOLD),
        seconds(matches, ARG_BRUTE_FORCE_LOCKOUT),
    ) {
        config = config.with_brute_force(*threshold, lockout);
    }
    if let Some(ttl) = seconds(matches, ARG_CSRF_TTL) {
        config = config.with_csrf_ttl(ttl);
    }
    if let Some(ttl) = seconds(matches, ARG_SESSION_TTL) {
        config = config.with_session_ttl(ttl);
    }
    if let Some(max_age) = matches.get_one::<u64>(ARG_HSTS_MAX_AGE) {
        config = config.with_hsts_max_age(*max_age);
    }
    if let Some(interval) = seconds(matches, ARG_SWEEP_INTERVAL) {
        config = config.with_sweep(interval, Duration::from_secs(DEFAULT_SWEEP_GRACE_SECONDS));
    }

    let config = config.with_stages(StageToggles {
        size_limit: !matches.get_flag(ARG_DISABLE_SIZE_LIMIT),
        brute_force: !matches.get_flag(ARG_DISABLE_BRUTE_FORCE),
        rate_limit: !matches.get_flag(ARG_DISABLE_RATE_LIMIT),
        csrf: !matches.get_flag(ARG_DISABLE_CSRF),
        security_headers: !matches.get_flag(ARG_DISABLE_SECURITY_HEADERS),
    });

    config.validate().context("invalid security configuration")?;
    Ok(config)
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let config = security_config(matches)?;

    let admin_password = matches
        .get_one::<String>(ARG_ADMIN_PASSWORD)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --admin-password")?;

    Ok(Action::Server(Args {
        port,
        config,
        bootstrap: Bootstrap {
            admin_password: Some(admin_password),
            seed_api_user: matches.get_flag(ARG_SEED_API_USER),
        },
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::commands;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn matches(extra: &[&str]) -> clap::ArgMatches {
        let mut args = vec!["aigate"];
        args.extend_from_slice(extra);
        commands::new().get_matches_from(args)
    }

    #[test]
    fn test_handler_builds_server_action() {
        temp_env::with_vars_unset(["AIGATE_JWT_SECRET", "AIGATE_ADMIN_PASSWORD"], || {
            let action = handler(&matches(&[
                "--jwt-secret",
                SECRET,
                "--admin-password",
                "admin-pass",
                "--rate-limit-requests",
                "5",
                "--disable-csrf",
                "--seed-api-user",
                "--port",
                "9090",
            ]))
            .unwrap();
            let Action::Server(args) = action;
            assert_eq!(args.port, 9090);
            assert_eq!(args.config.rate_limit_requests(), 5);
            assert!(!args.config.stages().csrf);
            assert!(args.config.stages().rate_limit);
            assert!(args.bootstrap.seed_api_user);
            assert!(args.bootstrap.admin_password.is_some());
        });
    }

    #[test]
    fn test_missing_secret_fails() {
        temp_env::with_vars_unset(["AIGATE_JWT_SECRET", "AIGATE_ADMIN_PASSWORD"], || {
            let err = handler(&matches(&["--admin-password", "x"])).unwrap_err();
            assert!(err.to_string().contains("--jwt-secret"));
        });
    }

    #[test]
    fn test_short_secret_fails() {
        temp_env::with_vars_unset(["AIGATE_JWT_SECRET", "AIGATE_ADMIN_PASSWORD"], || {
            let err = security_config(&matches(&["--jwt-secret", "short"])).unwrap_err();
            assert!(err.to_string().contains("invalid security configuration"));
        });
    }

    #[test]
    fn test_missing_admin_password_fails() {
        temp_env::with_vars_unset(["AIGATE_JWT_SECRET", "AIGATE_ADMIN_PASSWORD"], || {
            let err = handler(&matches(&["--jwt-secret", SECRET])).unwrap_err();
            assert!(err.to_string().contains("--admin-password"));
        });
    }
}
