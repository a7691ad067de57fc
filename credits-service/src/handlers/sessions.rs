use crate::dtos::{
    CreateSessionRequest, DeleteAudioResponse, SessionListParams, SessionListResponse,
    SignedUrlResponse, UploadAudioParams,
};
use crate::middleware::CurrentTenant;
use crate::models::{NewSession, Session};
use crate::services::{ProcessedSession, UploadedAudio};
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_session(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let session = state
        .sessions
        .create_session(NewSession {
            tenant_id: tenant.tenant_id,
            patient_id: payload.patient_id,
            session_date: payload.session_date,
            duration_minutes: payload.duration_minutes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(
        state
            .sessions
            .get_session(tenant.tenant_id, session_id)
            .await?,
    ))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Query(params): Query<SessionListParams>,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = state
        .sessions
        .list_sessions(tenant.tenant_id, params.patient_id)
        .await?;
    Ok(Json(SessionListResponse { sessions }))
}

/// Raw audio body; the content type comes from the request header.
pub async fn upload_audio(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(session_id): Path<Uuid>,
    Query(params): Query<UploadAudioParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadedAudio>), AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let uploaded = state
        .audio
        .upload_audio(
            &tenant,
            session_id,
            params.file_name.as_deref(),
            content_type,
            body.to_vec(),
            params.duration_seconds,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

pub async fn delete_audio(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(session_id): Path<Uuid>,
) -> Result<Json<DeleteAudioResponse>, AppError> {
    let released_mb = state.audio.delete_audio(&tenant, session_id).await?;
    Ok(Json(DeleteAudioResponse { released_mb }))
}

pub async fn signed_audio_url(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SignedUrlResponse>, AppError> {
    let url = state.audio.signed_audio_url(&tenant, session_id).await?;
    Ok(Json(SignedUrlResponse { url }))
}

pub async fn process_session(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ProcessedSession>, AppError> {
    Ok(Json(
        state
            .processing
            .process_session(&tenant, session_id)
            .await?,
    ))
}
