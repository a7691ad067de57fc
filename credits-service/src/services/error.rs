//! Domain errors for credits-service.

use crate::services::providers::ProviderError;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CreditError {
    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("No account exists for this user")]
    TenantNotFound,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Workflow-level outcome. `CreditLedger::debit` reports this as `false`.
    #[error(
        "Not enough credits: this operation needs {required} credits and {available} are available (short by {})",
        required - available
    )]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Session not found")]
    SessionNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Session is already being processed")]
    AlreadyProcessing,

    #[error("Session already has audio; delete it before uploading again")]
    AudioAlreadyAttached,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(anyhow::Error),

    #[error("Transcription provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl CreditError {
    /// Wrap a store/object-store failure with context.
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        CreditError::StorageUnavailable(anyhow::anyhow!("{}: {}", context, err))
    }

    /// Credits missing for an `InsufficientCredits` outcome.
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            CreditError::InsufficientCredits {
                required,
                available,
            } => Some(required - available),
            _ => None,
        }
    }

    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            CreditError::Unauthenticated => "unauthenticated",
            CreditError::TenantNotFound => "tenant_not_found",
            CreditError::InvalidInput(_) => "invalid_input",
            CreditError::QuotaExceeded(_) => "quota_exceeded",
            CreditError::InsufficientCredits { .. } => "insufficient_credits",
            CreditError::SessionNotFound => "session_not_found",
            CreditError::PatientNotFound => "patient_not_found",
            CreditError::AlreadyProcessing => "already_processing",
            CreditError::AudioAlreadyAttached => "audio_already_attached",
            CreditError::StorageUnavailable(_) => "storage_unavailable",
            CreditError::Provider(_) => "provider_error",
        }
    }
}

impl From<CreditError> for AppError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::Unauthenticated => AppError::Unauthorized(anyhow::anyhow!("{}", err)),
            CreditError::TenantNotFound
            | CreditError::SessionNotFound
            | CreditError::PatientNotFound => AppError::NotFound(anyhow::anyhow!("{}", err)),
            CreditError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            CreditError::QuotaExceeded(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            CreditError::InsufficientCredits { .. } => AppError::PaymentRequired(err.to_string()),
            CreditError::AlreadyProcessing | CreditError::AudioAlreadyAttached => {
                AppError::Conflict(anyhow::anyhow!("{}", err))
            }
            CreditError::StorageUnavailable(e) => AppError::ServiceUnavailable(e),
            CreditError::Provider(e) => AppError::BadGateway(e.to_string()),
        }
    }
}
