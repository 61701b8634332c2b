use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path,
    },
    http::StatusCode,
    response::{Json, Response},
};
use uuid::Uuid;

use super::{
    json_body, respond,
    types::{AuthorizeRequest, ErrorBody},
};
use crate::{api::state::AppState, error::GateError, identity::AuthenticatedIdentity};

#[utoipa::path(
    post,
    path = "/v1/tenants/{tenant_id}/authorize",
    params(("tenant_id" = Uuid, Path, description = "Tenant the permissions are scoped to")),
    request_body = AuthorizeRequest,
    responses(
        (status = 204, description = "Identity holds every permission in the tenant"),
        (status = 400, description = "Malformed tenant id or body", body = ErrorBody),
        (status = 403, description = "Missing permission", body = ErrorBody)
    ),
    security(("bearer" = []), ("api_key" = [])),
    tag = "identity"
)]
pub async fn authorize(
    Extension(state): Extension<AppState>,
    Extension(identity): Extension<AuthenticatedIdentity>,
    tenant_id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AuthorizeRequest>, JsonRejection>,
) -> Response {
    let result = async {
        let Path(tenant_id) =
            tenant_id.map_err(|rejection| GateError::Validation(rejection.body_text()))?;
        let body = json_body(payload)?;
        state
            .guard()
            .require_permissions(&identity, tenant_id, &body.permissions)
            .await?;
        Ok::<_, GateError>(StatusCode::NO_CONTENT)
    }
    .await;
    respond(&state, result)
}
