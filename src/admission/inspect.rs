//! Cheap screening of presented credentials before any lookup.

use crate::error::GatewayError;

/// Cap for API keys and session tokens.
pub const MAX_CREDENTIAL_LEN: usize = 512;

/// Cap for signed tokens, which grow with the role and permission lists.
pub const MAX_SIGNED_TOKEN_LEN: usize = 16 * 1024;

const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:",
    "vbscript:",
    "onload=",
    "onerror=",
    "eval(",
    "expression(",
    "../",
    "..\\",
    "%2e%2e",
    "%252e%252e",
];

/// Reject oversized credentials and ones carrying injection or traversal
/// patterns.
///
/// # Errors
/// Returns a `Security` error (`suspicious_input`).
pub fn inspect_credential(raw: &str) -> Result<(), GatewayError> {
    screen(raw, MAX_CREDENTIAL_LEN)
}

/// Same screen as [`inspect_credential`] with the signed-token length cap.
///
/// # Errors
/// Returns a `Security` error (`suspicious_input`).
pub fn inspect_signed_token(raw: &str) -> Result<(), GatewayError> {
    screen(raw, MAX_SIGNED_TOKEN_LEN)
}

fn screen(raw: &str, max_len: usize) -> Result<(), GatewayError> {
    if raw.len() > max_len {
        return Err(GatewayError::suspicious("Credential too long"));
    }
    if contains_suspicious_pattern(raw) {
        return Err(GatewayError::suspicious("Credential contains invalid characters"));
    }
    Ok(())
}

#[must_use]
pub fn contains_suspicious_pattern(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    SUSPICIOUS_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{codes, ErrorKind};

    #[test]
    fn normal_credentials_pass() {
        assert!(inspect_credential(&format!("gw-{}", "ab".repeat(32))).is_ok());
        assert!(inspect_credential("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJ1MSJ9.c2ln").is_ok());
    }

    #[test]
    fn patterns_are_case_insensitive() {
        for bad in [
            "gw-<SCRIPT>alert(1)",
            "JavaScript:void(0)",
            "gw-../../etc/passwd",
            "gw-%2E%2E%2f",
            "gw-..\\windows",
        ] {
            let err = inspect_credential(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Security, "{bad}");
            assert_eq!(err.code(), codes::SUSPICIOUS_INPUT);
        }
    }

    #[test]
    fn oversized_credential_is_rejected() {
        let long = "a".repeat(MAX_CREDENTIAL_LEN + 1);
        assert_eq!(
            inspect_credential(&long).map_err(|e| e.kind()),
            Err(ErrorKind::Security)
        );
        assert!(inspect_credential(&"a".repeat(MAX_CREDENTIAL_LEN)).is_ok());
    }

    #[test]
    fn signed_tokens_get_a_wider_cap() {
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{}.c2ln", "A".repeat(2048));
        assert!(inspect_credential(&token).is_err());
        assert!(inspect_signed_token(&token).is_ok());
        assert!(inspect_signed_token(&"a".repeat(MAX_SIGNED_TOKEN_LEN + 1)).is_err());
        assert!(inspect_signed_token("eyJ.<script>.x").is_err());
    }
}
