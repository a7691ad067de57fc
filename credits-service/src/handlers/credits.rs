use crate::dtos::{
    BalanceResponse, CheckCreditsParams, CheckCreditsResponse, CostParams, CostResponse,
    CreditRequest, DebitRequest, DebitResponse, TransactionListParams, TransactionListResponse,
};
use crate::middleware::CurrentTenant;
use crate::models::{CreditSnapshot, CreditStats};
use crate::services::{credits_for_minutes, CREDITS_PER_MINUTE};
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

const DEFAULT_TRANSACTION_PAGE: i64 = 50;

pub async fn get_balance(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<CreditSnapshot>, AppError> {
    Ok(Json(state.ledger.get_balance(tenant.tenant_id).await?))
}

pub async fn check_credits(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Query(params): Query<CheckCreditsParams>,
) -> Result<Json<CheckCreditsResponse>, AppError> {
    let sufficient = state
        .ledger
        .has_sufficient_credits(tenant.tenant_id, params.required)
        .await?;
    Ok(Json(CheckCreditsResponse { sufficient }))
}

/// Insufficient credits is a normal `debited: false`, not an error.
pub async fn debit(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(payload): Json<DebitRequest>,
) -> Result<Json<DebitResponse>, AppError> {
    payload.validate()?;

    let debited = state
        .ledger
        .debit(
            tenant.tenant_id,
            payload.amount,
            payload.session_id,
            &payload.description,
        )
        .await?;
    Ok(Json(DebitResponse { debited }))
}

pub async fn credit(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Json(payload): Json<CreditRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    payload.validate()?;

    let balance = state
        .ledger
        .credit(
            tenant.tenant_id,
            payload.amount,
            payload.kind,
            &payload.description,
            payload.external_payment_ref,
        )
        .await?;
    Ok(Json(BalanceResponse { balance }))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
    Query(params): Query<TransactionListParams>,
) -> Result<Json<TransactionListResponse>, AppError> {
    let transactions = state
        .ledger
        .list_transactions(
            tenant.tenant_id,
            params.limit.unwrap_or(DEFAULT_TRANSACTION_PAGE),
        )
        .await?;
    Ok(Json(TransactionListResponse { transactions }))
}

pub async fn get_stats(
    State(state): State<AppState>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<CreditStats>, AppError> {
    Ok(Json(state.ledger.get_stats(tenant.tenant_id).await?))
}

/// Price quote. Needs no tenant.
pub async fn quote_cost(Query(params): Query<CostParams>) -> Result<Json<CostResponse>, AppError> {
    let credits = credits_for_minutes(params.duration_minutes)?;
    Ok(Json(CostResponse {
        duration_minutes: params.duration_minutes,
        credits,
        credits_per_minute: CREDITS_PER_MINUTE,
    }))
}
