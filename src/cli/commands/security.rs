use clap::{Arg, ArgAction, Command};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_TOKEN_TTL: &str = "token-ttl-seconds";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_API_KEY_PREFIX: &str = "api-key-prefix";
pub const ARG_MAX_API_KEYS: &str = "max-api-keys";
pub const ARG_MAX_REQUEST_BYTES: &str = "max-request-bytes";
pub const ARG_RATE_LIMIT_REQUESTS: &str = "rate-limit-requests";
pub const ARG_RATE_LIMIT_WINDOW: &str = "rate-limit-window-seconds";
pub const ARG_BRUTE_FORCE_THRESHOLD: &str = "brute-force-threshold";
pub const ARG_BRUTE_FORCE_LOCKOUT: &str = "brute-force-lockout-seconds";
pub const ARG_CSRF_TTL: &str = "csrf-ttl-seconds";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_HSTS_MAX_AGE: &str = "hsts-max-age";
pub const ARG_SWEEP_INTERVAL: &str = "sweep-interval-seconds";
pub const ARG_DISABLE_SIZE_LIMIT: &str = "disable-size-limit";
pub const ARG_DISABLE_BRUTE_FORCE: &str = "disable-brute-force";
pub const ARG_DISABLE_RATE_LIMIT: &str = "disable-rate-limit";
pub const ARG_DISABLE_CSRF: &str = "disable-csrf";
pub const ARG_DISABLE_SECURITY_HEADERS: &str = "disable-security-headers";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";
pub const ARG_SEED_API_USER: &str = "seed-api-user";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_credential_args(command);
    let command = with_admission_args(command);
    let command = with_stage_toggles(command);
    with_bootstrap_args(command)
}

fn with_credential_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 signing secret for tokens, at least 32 bytes")
                .env("AIGATE_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL)
                .long(ARG_TOKEN_TTL)
                .help("Signed token lifetime in seconds")
                .env("AIGATE_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim written to and required on signed tokens")
                .env("AIGATE_TOKEN_ISSUER")
                .default_value("ai-gateway"),
        )
        .arg(
            Arg::new(ARG_API_KEY_PREFIX)
                .long(ARG_API_KEY_PREFIX)
                .help("Static prefix of issued API keys")
                .env("AIGATE_API_KEY_PREFIX")
                .default_value("gw-"),
        )
        .arg(
            Arg::new(ARG_MAX_API_KEYS)
                .long(ARG_MAX_API_KEYS)
                .help("Maximum number of unexpired API keys per user")
                .env("AIGATE_MAX_API_KEYS")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session lifetime in seconds")
                .env("AIGATE_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_admission_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_REQUEST_BYTES)
                .long(ARG_MAX_REQUEST_BYTES)
                .help("Largest accepted request body in bytes")
                .env("AIGATE_MAX_REQUEST_BYTES")
                .default_value("10485760")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_REQUESTS)
                .long(ARG_RATE_LIMIT_REQUESTS)
                .help("Requests allowed per origin per window")
                .env("AIGATE_RATE_LIMIT_REQUESTS")
                .default_value("60")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW)
                .long(ARG_RATE_LIMIT_WINDOW)
                .help("Rate limit window in seconds")
                .env("AIGATE_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_BRUTE_FORCE_THRESHOLD)
                .long(ARG_BRUTE_FORCE_THRESHOLD)
                .help("Consecutive authentication failures before an origin is banned")
                .env("AIGATE_BRUTE_FORCE_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_BRUTE_FORCE_LOCKOUT)
                .long(ARG_BRUTE_FORCE_LOCKOUT)
                .help("Ban duration in seconds")
                .env("AIGATE_BRUTE_FORCE_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_CSRF_TTL)
                .long(ARG_CSRF_TTL)
                .help("CSRF token lifetime in seconds")
                .env("AIGATE_CSRF_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_HSTS_MAX_AGE)
                .long(ARG_HSTS_MAX_AGE)
                .help("Strict-Transport-Security max-age in seconds, 0 disables the header")
                .env("AIGATE_HSTS_MAX_AGE")
                .default_value("0")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL)
                .long(ARG_SWEEP_INTERVAL)
                .help("Interval in seconds between sweeps of expired state")
                .env("AIGATE_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_stage_toggles(command: Command) -> Command {
    [
        (ARG_DISABLE_SIZE_LIMIT, "Disable the request size limit"),
        (ARG_DISABLE_BRUTE_FORCE, "Disable the brute-force guard"),
        (ARG_DISABLE_RATE_LIMIT, "Disable per-origin rate limiting"),
        (ARG_DISABLE_CSRF, "Disable CSRF tokens on state-changing requests"),
        (ARG_DISABLE_SECURITY_HEADERS, "Disable response security headers"),
    ]
    .into_iter()
    .fold(command, |command, (id, help)| {
        command.arg(
            Arg::new(id)
                .long(id)
                .help(help)
                .action(ArgAction::SetTrue),
        )
    })
}

fn with_bootstrap_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long(ARG_ADMIN_PASSWORD)
                .help("Password of the bootstrap admin user")
                .env("AIGATE_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SEED_API_USER)
                .long(ARG_SEED_API_USER)
                .help("Create the key-only api-user with ai:chat, ai:completion and ai:models")
                .action(ArgAction::SetTrue),
        )
}
