use crate::dtos::ObjectParams;
use crate::services::object_store::content_type_for_path;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use service_core::error::AppError;

/// Serve a stored object behind a valid, unexpired signature.
pub async fn download_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<ObjectParams>,
) -> Result<impl IntoResponse, AppError> {
    let path = path.trim_start_matches('/');
    if !state.objects.verify(path, params.expires, &params.signature) {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Invalid or expired signature"
        )));
    }

    let bytes = state
        .objects
        .read_object(path)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Object not found")))?;

    Ok(([(header::CONTENT_TYPE, content_type_for_path(path))], bytes))
}
