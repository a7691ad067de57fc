//! Services for credits-service.

pub mod audio;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod object_store;
pub mod processing;
pub mod providers;
pub mod quota;
pub mod sessions;
pub mod store;
pub mod tenants;
pub mod usage;

pub use audio::{AudioService, UploadedAudio};
pub use error::CreditError;
pub use ledger::CreditLedger;
pub use metrics::{get_metrics, init_metrics};
pub use object_store::{LocalObjectStore, ObjectStore};
pub use processing::{ProcessedSession, ProcessingService};
pub use providers::{ProviderError, TranscriptionProvider};
pub use quota::{PatientQuotaGuard, StorageQuotaGuard};
pub use sessions::SessionService;
pub use store::{CreditStore, FailPoint, InMemoryCreditStore, PgCreditStore};
pub use tenants::{Onboarded, TenantService};
pub use usage::{credits_for_minutes, CREDITS_PER_MINUTE};
