//! Permission evaluator.
//!
//! A permission string is one of:
//!
//! - `*` grants every action on every resource
//! - `resource:*` grants every action on `resource`
//! - `resource:action` grants exactly that pair
//!
//! Any grant is enough; there are no deny rules, so adding a permission can
//! only widen access. The `admin` role short-circuits to allow.

use std::fmt;
use std::str::FromStr;

pub const ADMIN_ROLE: &str = "admin";
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid permission {0:?}: expected \"*\", \"resource:*\" or \"resource:action\"")]
pub struct PermissionError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    All,
    Resource(String),
    Action { resource: String, action: String },
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != WILDCARD
        && !segment.contains(':')
        && !segment.chars().any(char::is_whitespace)
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == WILDCARD {
            return Ok(Self::All);
        }
        let Some((resource, action)) = value.split_once(':') else {
            return Err(PermissionError(value.to_string()));
        };
        if !valid_segment(resource) {
            return Err(PermissionError(value.to_string()));
        }
        if action == WILDCARD {
            return Ok(Self::Resource(resource.to_string()));
        }
        if !valid_segment(action) {
            return Err(PermissionError(value.to_string()));
        }
        Ok(Self::Action {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(WILDCARD),
            Self::Resource(resource) => write!(f, "{resource}:{WILDCARD}"),
            Self::Action { resource, action } => write!(f, "{resource}:{action}"),
        }
    }
}

impl Permission {
    #[must_use]
    pub fn grants(&self, resource: &str, action: &str) -> bool {
        match self {
            Self::All => true,
            Self::Resource(r) => r == resource,
            Self::Action {
                resource: r,
                action: a,
            } => r == resource && a == action,
        }
    }
}

/// Check that every entry follows the permission grammar.
///
/// # Errors
/// Returns the first malformed entry.
pub fn validate_all<S: AsRef<str>>(permissions: &[S]) -> Result<(), PermissionError> {
    for permission in permissions {
        permission.as_ref().parse::<Permission>()?;
    }
    Ok(())
}

/// Decide whether `roles`/`permissions` allow `action` on `resource`.
///
/// Malformed permission strings grant nothing. A request for an empty
/// resource or action, or one containing `:`, is denied.
pub fn authorize<R, P>(roles: R, permissions: P, resource: &str, action: &str) -> bool
where
    R: IntoIterator,
    R::Item: AsRef<str>,
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    if roles.into_iter().any(|role| role.as_ref() == ADMIN_ROLE) {
        return true;
    }
    if resource.is_empty() || action.is_empty() || resource.contains(':') || action.contains(':')
    {
        return false;
    }
    permissions.into_iter().any(|permission| {
        permission
            .as_ref()
            .parse::<Permission>()
            .is_ok_and(|p| p.grants(resource, action))
    })
}

/// Whether a holder of `roles`/`permissions` may hand `requested` on to an API
/// key. A key can never carry more than its issuer holds.
pub fn can_delegate<R, P>(roles: R, permissions: P, requested: &Permission) -> bool
where
    R: IntoIterator,
    R::Item: AsRef<str>,
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    if roles.into_iter().any(|role| role.as_ref() == ADMIN_ROLE) {
        return true;
    }
    permissions.into_iter().any(|held| {
        held.as_ref()
            .parse::<Permission>()
            .is_ok_and(|held| match (&held, requested) {
                (Permission::All, _) => true,
                (Permission::Resource(r), Permission::Resource(wanted)) => r == wanted,
                (_, Permission::Action { resource, action }) => held.grants(resource, action),
                _ => false,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn parse_grammar() {
        assert_eq!("*".parse::<Permission>(), Ok(Permission::All));
        assert_eq!(
            "ai:*".parse::<Permission>(),
            Ok(Permission::Resource("ai".to_string()))
        );
        assert_eq!(
            "ai:chat".parse::<Permission>(),
            Ok(Permission::Action {
                resource: "ai".to_string(),
                action: "chat".to_string()
            })
        );
        for bad in ["", "ai", ":chat", "ai:", "*:chat", "ai:chat:extra", "a i:chat"] {
            assert!(bad.parse::<Permission>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn display_round_trips_through_parse() {
        for raw in ["*", "ai:*", "ai:chat"] {
            let parsed: Permission = raw.parse().unwrap_or(Permission::All);
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn admin_role_overrides() {
        assert!(authorize(["user", "admin"], NONE, "anything", "at_all"));
    }

    #[test]
    fn wildcard_grants_everything() {
        for (resource, action) in [("ai", "chat"), ("models", "delete"), ("x", "y")] {
            assert!(authorize(NONE, ["*"], resource, action));
        }
    }

    #[test]
    fn resource_wildcard_is_scoped() {
        assert!(authorize(NONE, ["ai:*"], "ai", "chat"));
        assert!(authorize(NONE, ["ai:*"], "ai", "embeddings"));
        assert!(!authorize(NONE, ["ai:*"], "models", "list"));
    }

    #[test]
    fn exact_match_only() {
        let perms = ["ai:chat"];
        assert!(authorize(NONE, perms, "ai", "chat"));
        assert!(!authorize(NONE, perms, "ai", "embeddings"));
        assert!(!authorize(NONE, perms, "models", "chat"));
    }

    #[test]
    fn order_does_not_matter() {
        let a = ["ai:chat", "models:*"];
        let b = ["models:*", "ai:chat"];
        for (resource, action) in [("ai", "chat"), ("models", "list"), ("ai", "models")] {
            assert_eq!(
                authorize(NONE, a, resource, action),
                authorize(NONE, b, resource, action)
            );
        }
    }

    #[test]
    fn empty_or_malformed_denies() {
        assert!(!authorize(NONE, NONE, "ai", "chat"));
        assert!(!authorize(NONE, ["ai"], "ai", "chat"));
        assert!(!authorize(NONE, ["ai:chat"], "", "chat"));
        assert!(!authorize(NONE, ["ai:*"], "ai", ""));
        assert!(!authorize(NONE, ["ai:*"], "ai", "x:y"));
    }

    #[test]
    fn validate_all_reports_first_bad_entry() {
        assert!(validate_all(&["ai:chat", "*"]).is_ok());
        assert_eq!(
            validate_all(&["ai:chat", "oops"]),
            Err(PermissionError("oops".to_string()))
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn delegation_never_widens() {
        let held = ["ai:chat", "models:*"];
        let delegate =
            |wanted: &str| can_delegate(NONE, held, &wanted.parse::<Permission>().unwrap());
        assert!(delegate("ai:chat"));
        assert!(!delegate("ai:embeddings"));
        assert!(!delegate("ai:*"));
        assert!(delegate("models:*"));
        assert!(delegate("models:list"));
        assert!(!delegate("*"));
        assert!(can_delegate(["admin"], NONE, &Permission::All));
        assert!(can_delegate(NONE, ["*"], &Permission::All));
    }
}
