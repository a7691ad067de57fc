//! Domain models for credits-service.

mod session;
mod tenant;
mod transaction;

pub use session::{
    ConversationMetrics, NewSession, Patient, ProcessingOutcome, ProcessingStatus, Session,
    SessionInsights, SpeakerIntensity, SpeakerTime,
};
pub use tenant::{
    CreditSnapshot, NewTenant, PlanLimits, StorageAvailability, SubscriptionPlan, Tenant,
    TRIAL_CREDITS, TRIAL_DAYS, TRIAL_MAX_PATIENTS, TRIAL_MAX_STORAGE_MB,
};
pub use transaction::{CreditStats, CreditTransaction, NewCredit, NewDebit, TransactionKind};
