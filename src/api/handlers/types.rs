//! Request and response bodies.
//!
//! Request bodies reject fields they do not declare.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::identity::AuthenticatedIdentity;

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct CodeRequest {
    pub email: String,
    /// One-time code delivered out of band.
    pub token: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct PasswordResetRequest {
    pub email: String,
    pub token: String,
    pub password: String,
}

#[derive(ToSchema, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct AuthorizeRequest {
    pub permissions: BTreeSet<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub admin: bool,
    pub verified: bool,
    pub tenants: Vec<Uuid>,
}

impl From<&AuthenticatedIdentity> for MeResponse {
    fn from(identity: &AuthenticatedIdentity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            admin: identity.admin,
            verified: identity.verified,
            tenants: identity.tenants.iter().copied().collect(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorDetail {
    pub status: u16,
    pub message: String,
}

/// Shape of every error response.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}
