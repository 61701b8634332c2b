use axum::{
    extract::{rejection::PathRejection, Extension, Path},
    http::StatusCode,
    response::Response,
};
use tracing::info;
use uuid::Uuid;

use super::{respond, types::ErrorBody};
use crate::{api::state::AppState, error::GateError, identity::AuthenticatedIdentity};

#[utoipa::path(
    delete,
    path = "/v1/admin/subjects/{subject_id}/challenges",
    params(("subject_id" = Uuid, Path, description = "Subject whose challenges are revoked")),
    responses(
        (status = 204, description = "All challenges revoked"),
        (status = 403, description = "Caller is not an admin", body = ErrorBody)
    ),
    security(("bearer" = []), ("api_key" = [])),
    tag = "admin"
)]
pub async fn revoke_challenges(
    Extension(state): Extension<AppState>,
    Extension(admin): Extension<AuthenticatedIdentity>,
    subject_id: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let result = async {
        let Path(subject_id) =
            subject_id.map_err(|rejection| GateError::Validation(rejection.body_text()))?;
        state.challenges().invalidate_all(subject_id).await?;
        info!(admin_id = %admin.id, subject_id = %subject_id, "challenges revoked");
        Ok::<_, GateError>(StatusCode::NO_CONTENT)
    }
    .await;
    respond(&state, result)
}
