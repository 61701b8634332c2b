use super::handlers::{admin, auth, health, me, tenants, types};
use crate::identity::TokenBundle;
use utoipa::{
    openapi::{
        security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
        Contact, License,
    },
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::tfa_verify,
        auth::otp_request,
        auth::otp_verify,
        auth::refresh,
        auth::password_request,
        auth::password_reset,
        auth::verification_request,
        auth::verification_confirm,
        me::me,
        tenants::authorize,
        admin::revoke_challenges,
    ),
    components(schemas(
        health::Health,
        TokenBundle,
        types::LoginRequest,
        types::EmailRequest,
        types::CodeRequest,
        types::RefreshRequest,
        types::PasswordResetRequest,
        types::AuthorizeRequest,
        types::MeResponse,
        types::ErrorBody,
        types::ErrorDetail,
    )),
    modifiers(&CargoInfo, &SecuritySchemes),
    tags(
        (name = "health", description = "Liveness"),
        (name = "auth", description = "Sign-in, one-time codes and token refresh"),
        (name = "identity", description = "Endpoints that require an identified caller"),
        (name = "admin", description = "Administrative operations")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

struct CargoInfo;

impl Modify for CargoInfo {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        // Use Cargo.toml metadata instead of the derive defaults.
        openapi.info.title = env!("CARGO_PKG_NAME").to_string();
        openapi.info.version = env!("CARGO_PKG_VERSION").to_string();
        openapi.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
        openapi.info.contact = cargo_contact();
        openapi.info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
            let mut license = License::new(identifier);
            license.identifier = Some(identifier.to_string());
            license
        });
    }
}

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
        );
    }
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(':').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match (author.find('<'), author.rfind('>')) {
        (Some(start), Some(end)) if start < end => {
            let name = optional_str(author[..start].trim());
            let email = optional_str(author[start + 1..end].trim());
            (name, email)
        }
        _ => (optional_str(author), None),
    }
}

fn optional_str(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_gate_routes() {
        let doc = openapi();
        for path in [
            "/health",
            "/v1/auth/login",
            "/v1/auth/tfa/verify",
            "/v1/auth/refresh",
            "/v1/me",
            "/v1/tenants/{tenant_id}/authorize",
            "/v1/admin/subjects/{subject_id}/challenges",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn parse_author_splits_name_and_email() {
        assert_eq!(
            parse_author("Team Tollgate <team@tollgate.dev>"),
            (Some("Team Tollgate"), Some("team@tollgate.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
    }
}
