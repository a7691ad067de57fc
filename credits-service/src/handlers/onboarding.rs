use crate::dtos::{ExistsResponse, OnboardRequest};
use crate::middleware::{CurrentTenant, UserId};
use crate::models::{NewTenant, PlanLimits, Tenant};
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use validator::Validate;

/// First authenticated visit: create the trial tenant, or return the existing one.
pub async fn onboard(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(payload): Json<OnboardRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let onboarded = state
        .tenants
        .onboard(NewTenant {
            external_user_id: user_id,
            email: payload.email,
            display_name: payload.display_name,
        })
        .await?;

    let status = if onboarded.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(onboarded.tenant)))
}

/// Never fails for a caller without a tenant.
pub async fn exists(
    State(state): State<AppState>,
    user_id: Option<UserId>,
) -> Result<Json<ExistsResponse>, AppError> {
    let exists = state
        .tenants
        .exists(user_id.as_ref().map(|u| u.0.as_str()))
        .await?;
    Ok(Json(ExistsResponse { exists }))
}

pub async fn profile(CurrentTenant(tenant): CurrentTenant) -> Json<Tenant> {
    Json(tenant)
}

pub async fn plan_limits(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<PlanLimits>, AppError> {
    Ok(Json(state.tenants.plan_limits(&tenant).await?))
}
