//! Signed session tokens (HS256).
//!
//! ## Flow Overview
//! 1) `issue` embeds the user's identity, roles and permissions plus the
//!    standard claims (`iat`, `nbf`, `exp`, `iss`, `sub`) and signs them with the
//!    configured secret.
//! 2) `validate` inspects the header first and rejects any algorithm other than
//!    HS256 before the signature is checked, then verifies signature, issuer and
//!    time bounds with zero leeway.
//!
//! Tokens are self-contained. Checking that the user still exists and is active
//! is the caller's job (see `Authenticator::refresh_token`).

use chrono::Utc;
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey,
    EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use ulid::Ulid;

use super::models::User;

pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token signing failed: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub sub: String,
    pub jti: String,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: impl Into<String>, ttl: Duration) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            issuer: issuer.into(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token for `user`, valid from now for the configured TTL.
    ///
    /// # Errors
    /// Returns [`TokenError::Internal`] if signing fails.
    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            user_id: user.id.clone(),
            username: user.username.clone(),
            roles: user.roles.iter().cloned().collect(),
            permissions: user.permissions.iter().cloned().collect(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl),
            iss: self.issuer.clone(),
            sub: user.id.clone(),
            jti: Ulid::new().to_string(),
        };
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(TOKEN_ALGORITHM), claims, &self.encoding)
            .map_err(|err| TokenError::Internal(err.to_string()))
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    /// [`TokenError::Malformed`] for undecodable input or wrong issuer/subject,
    /// [`TokenError::BadSignature`] for a wrong algorithm or signature,
    /// [`TokenError::Expired`] / [`TokenError::NotYetValid`] outside the window.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != TOKEN_ALGORITHM {
            debug!(alg = ?header.alg, "rejected token with unexpected algorithm");
            return Err(TokenError::BadSignature);
        }

        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                JwtErrorKind::ExpiredSignature => TokenError::Expired,
                JwtErrorKind::ImmatureSignature => TokenError::NotYetValid,
                JwtErrorKind::InvalidSignature | JwtErrorKind::InvalidAlgorithm => {
                    TokenError::BadSignature
                }
                _ => TokenError::Malformed,
            }
        })?;

        if data.claims.sub != data.claims.user_id {
            return Err(TokenError::Malformed);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use base64ct::{Base64UrlUnpadded, Encoding};
    use std::collections::BTreeSet;

    const SECRET: &str = "0123456789abcdef0123456789abcdef-test";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            &SecretString::from(SECRET.to_string()),
            "ai-gateway",
            Duration::from_secs(3600),
        )
    }

    fn user() -> User {
        User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            roles: BTreeSet::from(["user".to_string()]),
            permissions: BTreeSet::from(["ai:chat".to_string()]),
            active: true,
            created_at: Utc::now(),
            last_login: None,
            password_hash: None,
        }
    }

    #[test]
    fn issue_then_validate() {
        let issuer = issuer();
        let token = issuer.issue(&user()).unwrap();
        let claims = issuer.validate(&token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.iss, "ai-gateway");
        assert_eq!(claims.roles, vec!["user".to_string()]);
        assert_eq!(claims.permissions, vec!["ai:chat".to_string()]);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn wrong_secret_is_bad_signature() {
        let token = issuer().issue(&user()).unwrap();
        let other = TokenIssuer::new(
            &SecretString::from("another-secret-another-secret-0000".to_string()),
            "ai-gateway",
            Duration::from_secs(3600),
        );
        assert_eq!(other.validate(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = issuer();
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            roles: vec![],
            permissions: vec![],
            iat: now - 7200,
            nbf: now - 7200,
            exp: now - 3600,
            iss: "ai-gateway".to_string(),
            sub: "u1".to_string(),
            jti: "x".to_string(),
        };
        let token = issuer.sign(&claims).unwrap();
        assert_eq!(issuer.validate(&token), Err(TokenError::Expired));
    }

    #[test]
    fn future_token_is_not_yet_valid() {
        let issuer = issuer();
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            roles: vec![],
            permissions: vec![],
            iat: now,
            nbf: now + 3600,
            exp: now + 7200,
            iss: "ai-gateway".to_string(),
            sub: "u1".to_string(),
            jti: "x".to_string(),
        };
        let token = issuer.sign(&claims).unwrap();
        assert_eq!(issuer.validate(&token), Err(TokenError::NotYetValid));
    }

    #[test]
    fn foreign_issuer_is_malformed() {
        let token = issuer().issue(&user()).unwrap();
        let other = TokenIssuer::new(
            &SecretString::from(SECRET.to_string()),
            "someone-else",
            Duration::from_secs(3600),
        );
        assert_eq!(other.validate(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn algorithm_none_is_rejected() {
        let token = issuer().issue(&user()).unwrap();
        let mut parts = token.split('.');
        let _header = parts.next().unwrap();
        let payload = parts.next().unwrap();
        let none_header = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
        let forged = format!("{none_header}.{payload}.");
        assert!(issuer().validate(&forged).is_err());
    }

    #[test]
    fn other_hmac_algorithm_is_rejected() {
        let issuer = issuer();
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            roles: vec![],
            permissions: vec![],
            iat: now,
            nbf: now,
            exp: now + 60,
            iss: "ai-gateway".to_string(),
            sub: "u1".to_string(),
            jti: "x".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_eq!(issuer.validate(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(issuer().validate("not.a.jwt"), Err(TokenError::Malformed));
        assert_eq!(issuer().validate(""), Err(TokenError::Malformed));
    }
}
