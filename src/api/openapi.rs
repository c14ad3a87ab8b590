use crate::api::handlers::{auth, authorize, health, keys};
use crate::identity::models::{ApiKeyView, AuthMethod, UserContext};
use utoipa::openapi::{Contact, InfoBuilder, License};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::csrf_token,
        keys::create,
        keys::list,
        keys::revoke,
        authorize::authorize,
    ),
    components(schemas(
        health::Health,
        auth::LoginRequest,
        auth::LoginResponse,
        auth::RefreshRequest,
        auth::TokenResponse,
        auth::CsrfResponse,
        keys::CreateKeyRequest,
        keys::CreatedKey,
        authorize::Decision,
        ApiKeyView,
        AuthMethod,
        UserContext,
    )),
    tags(
        (name = "health", description = "Liveness and counters"),
        (name = "auth", description = "Password login, token refresh and CSRF tokens"),
        (name = "keys", description = "API key management"),
        (name = "authorize", description = "Permission checks"),
    )
)]
struct ApiDoc;

/// `OpenAPI` document with metadata taken from Cargo.toml.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact(env!("CARGO_PKG_AUTHORS"));
    info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|id| {
        let mut license = License::new(id);
        license.identifier = Some(id.to_string());
        license
    });
    doc.info = info;
    doc
}

fn optional_str(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|v| !v.is_empty())
}

// Cargo joins authors with `:`; only the first one is used.
fn cargo_contact(authors: &str) -> Option<Contact> {
    let primary = optional_str(authors.split(':').next()?)?;
    let (name, email) = match primary.split_once('<') {
        Some((name, rest)) => (optional_str(name), optional_str(rest.trim_end_matches('>'))),
        None => (Some(primary), None),
    };
    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        for path in [
            "/health",
            "/v1/auth/login",
            "/v1/auth/refresh",
            "/v1/auth/logout",
            "/v1/auth/csrf",
            "/v1/keys",
            "/v1/keys/{id}",
            "/v1/authorize/{resource}/{action}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }

    #[test]
    fn contact_parsing() {
        let contact = cargo_contact("Team <team@example.com>:Other").map(|c| (c.name, c.email));
        assert_eq!(
            contact,
            Some((Some("Team".to_string()), Some("team@example.com".to_string())))
        );
        let contact = cargo_contact("Solo").map(|c| (c.name, c.email));
        assert_eq!(contact, Some((Some("Solo".to_string()), None)));
    }
}
