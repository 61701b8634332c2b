use axum::{extract::Extension, response::Json};

use super::types::{ErrorBody, MeResponse};
use crate::identity::AuthenticatedIdentity;

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Identity resolved for this request", body = MeResponse),
        (status = 403, description = "Missing or rejected credentials", body = ErrorBody)
    ),
    security(("bearer" = []), ("api_key" = [])),
    tag = "identity"
)]
// The gate only reaches this handler after identification succeeded.
pub async fn me(Extension(identity): Extension<AuthenticatedIdentity>) -> Json<MeResponse> {
    Json(MeResponse::from(&identity))
}
