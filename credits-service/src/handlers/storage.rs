use crate::dtos::{StorageAmountRequest, StorageCheckParams, StorageUsageResponse};
use crate::middleware::CurrentTenant;
use crate::models::StorageAvailability;
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

pub async fn check_available(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Query(params): Query<StorageCheckParams>,
) -> Result<Json<StorageAvailability>, AppError> {
    let availability = state
        .storage_quota
        .check_available(tenant.tenant_id, params.file_size_mb)
        .await?;
    Ok(Json(availability))
}

pub async fn reserve(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(payload): Json<StorageAmountRequest>,
) -> Result<Json<StorageUsageResponse>, AppError> {
    let current_mb = state
        .storage_quota
        .reserve_on_upload(tenant.tenant_id, payload.file_size_mb)
        .await?;
    Ok(Json(StorageUsageResponse { current_mb }))
}

pub async fn release(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(payload): Json<StorageAmountRequest>,
) -> Result<Json<StorageUsageResponse>, AppError> {
    let current_mb = state
        .storage_quota
        .release_on_delete(tenant.tenant_id, payload.file_size_mb)
        .await?;
    Ok(Json(StorageUsageResponse { current_mb }))
}
