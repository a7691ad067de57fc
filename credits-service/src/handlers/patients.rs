use crate::dtos::{CanCreatePatientResponse, CreatePatientRequest, PatientListResponse};
use crate::models::Patient;
use crate::middleware::CurrentTenant;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_patient(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(payload): Json<CreatePatientRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let patient = state
        .patient_quota
        .create_patient(tenant.tenant_id, &payload.name)
        .await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn list_patients(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<PatientListResponse>, AppError> {
    let patients = state.patient_quota.list_patients(tenant.tenant_id).await?;
    Ok(Json(PatientListResponse { patients }))
}

pub async fn get_patient(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Patient>, AppError> {
    Ok(Json(
        state
            .patient_quota
            .get_patient(tenant.tenant_id, patient_id)
            .await?,
    ))
}

pub async fn deactivate_patient(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Path(patient_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .patient_quota
        .deactivate_patient(tenant.tenant_id, patient_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn can_create_patient(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<CanCreatePatientResponse>, AppError> {
    let can_create = state
        .patient_quota
        .can_create_patient(tenant.tenant_id)
        .await?;
    Ok(Json(CanCreatePatientResponse { can_create }))
}
