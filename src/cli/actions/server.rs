use crate::{api, audit::AuditLogger, config::SecurityConfig, state::Bootstrap, state::GatewayState};
use anyhow::Result;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub config: SecurityConfig,
    pub bootstrap: Bootstrap,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is rejected, bootstrap users cannot be
/// created, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let state = GatewayState::new(args.config, AuditLogger::default())?;
    state.bootstrap(args.bootstrap).await?;

    api::new(args.port, state).await
}

fn log_startup_args(args: &Args) {
    let stages = args.config.stages();
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("token_issuer", args.config.token_issuer().to_string()),
        ("token_ttl", format!("{}s", args.config.token_ttl().as_secs())),
        ("api_key_prefix", args.config.api_key_prefix().to_string()),
        (
            "rate_limit",
            format!(
                "{}/{}s",
                args.config.rate_limit_requests(),
                args.config.rate_limit_window().as_secs()
            ),
        ),
        (
            "brute_force",
            format!(
                "{} failures, {}s lockout",
                args.config.brute_force_threshold(),
                args.config.brute_force_lockout().as_secs()
            ),
        ),
        ("max_request_bytes", args.config.max_request_bytes().to_string()),
        ("csrf", stages.csrf.to_string()),
        ("security_headers", stages.security_headers.to_string()),
        ("seed_api_user", args.bootstrap.seed_api_user.to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
