//! Request and response bodies.

use crate::models::{CreditTransaction, Patient, Session, TransactionKind};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct OnboardRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckCreditsParams {
    pub required: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckCreditsResponse {
    pub sufficient: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DebitRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
    pub session_id: Uuid,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DebitResponse {
    pub debited: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreditRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
    pub kind: TransactionKind,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    #[validate(length(min = 1, max = 255))]
    pub external_payment_ref: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct TransactionListParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub transactions: Vec<CreditTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct CostParams {
    pub duration_minutes: f64,
}

#[derive(Debug, Serialize)]
pub struct CostResponse {
    pub duration_minutes: f64,
    pub credits: i64,
    pub credits_per_minute: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct StorageCheckParams {
    pub file_size_mb: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct StorageAmountRequest {
    pub file_size_mb: Decimal,
}

#[derive(Debug, Serialize)]
pub struct StorageUsageResponse {
    pub current_mb: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePatientRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct PatientListResponse {
    pub patients: Vec<Patient>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CanCreatePatientResponse {
    pub can_create: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    pub patient_id: Uuid,
    pub session_date: NaiveDate,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
}

#[derive(Debug, Deserialize)]
pub struct SessionListParams {
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
}

#[derive(Debug, Deserialize)]
pub struct UploadAudioParams {
    pub file_name: Option<String>,
    pub duration_seconds: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct SignedUrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteAudioResponse {
    pub released_mb: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ObjectParams {
    pub expires: i64,
    pub signature: String,
}
