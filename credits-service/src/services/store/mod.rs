//! Persistence for tenants, the credit ledger, patients and sessions.
//!
//! Every balance or storage-counter change goes through a single atomic
//! conditional operation here; services never read-modify-write.

mod memory;
mod postgres;

pub use memory::{FailPoint, InMemoryCreditStore};
pub use postgres::PgCreditStore;

use crate::models::{
    CreditStats, CreditTransaction, NewCredit, NewDebit, Patient, ProcessingOutcome,
    Session, Tenant,
};
use crate::services::CreditError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn health_check(&self) -> Result<(), CreditError>;

    // Tenants

    /// Insert a tenant unless one already exists for the external user id.
    /// Returns the stored tenant and whether it was created by this call.
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(Tenant, bool), CreditError>;

    async fn find_tenant_by_external_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Tenant>, CreditError>;

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, CreditError>;

    // Ledger

    /// Atomically subtract `debit.amount` if the balance covers it, append the
    /// transaction and bump the session's `credits_consumed`.
    ///
    /// `Ok(None)` means the balance was insufficient and nothing changed.
    async fn debit_if_sufficient(
        &self,
        debit: &NewDebit,
    ) -> Result<Option<CreditTransaction>, CreditError>;

    /// Atomically add `credit.amount` and append the transaction.
    async fn credit(&self, credit: &NewCredit) -> Result<CreditTransaction, CreditError>;

    /// Most recent first.
    async fn list_transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError>;

    async fn credit_stats(&self, tenant_id: Uuid) -> Result<CreditStats, CreditError>;

    // Storage counter

    /// Atomically add `size_mb` if it fits under the ceiling. Returns the new
    /// usage, or `QuotaExceeded`.
    async fn reserve_storage(&self, tenant_id: Uuid, size_mb: Decimal)
        -> Result<Decimal, CreditError>;

    /// Atomically subtract `size_mb`, flooring at zero. Returns the new usage.
    async fn release_storage(&self, tenant_id: Uuid, size_mb: Decimal)
        -> Result<Decimal, CreditError>;

    // Patients

    async fn count_active_patients(&self, tenant_id: Uuid) -> Result<i64, CreditError>;

    /// Insert an active patient if the tenant is under its ceiling. The count
    /// and the insert happen under one tenant lock.
    async fn insert_patient_within_limit(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Patient, CreditError>;

    async fn deactivate_patient(&self, tenant_id: Uuid, patient_id: Uuid)
        -> Result<(), CreditError>;

    /// Active patients, newest first.
    async fn list_active_patients(&self, tenant_id: Uuid) -> Result<Vec<Patient>, CreditError>;

    /// Any patient of the tenant, active or not.
    async fn get_patient(
        &self,
        tenant_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<Patient>, CreditError>;

    // Sessions

    async fn insert_session(&self, session: &Session) -> Result<Session, CreditError>;

    async fn get_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, CreditError>;

    /// Latest session date first, optionally narrowed to one patient.
    async fn list_sessions(
        &self,
        tenant_id: Uuid,
        patient_id: Option<Uuid>,
    ) -> Result<Vec<Session>, CreditError>;

    /// Record audio on a session that has none.
    ///
    /// Fails with `AudioAlreadyAttached` if another upload got there first.
    async fn attach_audio(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        storage_path: &str,
        size_mb: Decimal,
        duration_seconds: Option<i32>,
    ) -> Result<(), CreditError>;

    async fn detach_audio(&self, tenant_id: Uuid, session_id: Uuid) -> Result<(), CreditError>;

    /// Move a session to `processing` unless it is already there.
    /// Returns `false` when another run holds it.
    async fn begin_processing(&self, tenant_id: Uuid, session_id: Uuid)
        -> Result<bool, CreditError>;

    async fn fail_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        error: &str,
    ) -> Result<(), CreditError>;

    async fn complete_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        outcome: &ProcessingOutcome,
    ) -> Result<(), CreditError>;
}
