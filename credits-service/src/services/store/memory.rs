//! In-process store guarded by a single async mutex.
//!
//! Each trait method runs as one critical section, which gives the same
//! all-or-nothing behaviour as the Postgres transactions.

use super::CreditStore;
use crate::models::{
    CreditStats, CreditTransaction, NewCredit, NewDebit, Patient, ProcessingOutcome,
    ProcessingStatus, Session, Tenant, TransactionKind,
};
use crate::services::CreditError;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Debit,
    Credit,
    ReserveStorage,
    ReleaseStorage,
    AttachAudio,
    DetachAudio,
    CompleteProcessing,
}

#[derive(Default)]
struct State {
    tenants: HashMap<Uuid, Tenant>,
    external_ids: HashMap<String, Uuid>,
    /// Per-tenant log in append order.
    transactions: HashMap<Uuid, Vec<CreditTransaction>>,
    patients: HashMap<Uuid, Patient>,
    sessions: HashMap<Uuid, Session>,
    failing: HashSet<FailPoint>,
}

impl State {
    fn check(&self, point: FailPoint) -> Result<(), CreditError> {
        if self.failing.contains(&point) {
            return Err(CreditError::storage(
                "Store unavailable",
                format!("injected failure at {:?}", point),
            ));
        }
        Ok(())
    }

    fn tenant_mut(&mut self, tenant_id: Uuid) -> Result<&mut Tenant, CreditError> {
        self.tenants
            .get_mut(&tenant_id)
            .ok_or(CreditError::TenantNotFound)
    }

    fn session_mut(
        &mut self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<&mut Session, CreditError> {
        self.sessions
            .get_mut(&session_id)
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or(CreditError::SessionNotFound)
    }

    fn active_patients(&self, tenant_id: Uuid) -> i64 {
        self.patients
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.is_active)
            .count() as i64
    }
}

/// Store used by tests and `STORE_BACKEND=memory`. Data does not survive a
/// restart.
#[derive(Default)]
pub struct InMemoryCreditStore {
    state: Mutex<State>,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `point` fail with `StorageUnavailable`.
    pub async fn inject_failure(&self, point: FailPoint) {
        self.state.lock().await.failing.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn health_check(&self) -> Result<(), CreditError> {
        Ok(())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(Tenant, bool), CreditError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .external_ids
            .get(&tenant.external_user_id)
            .and_then(|id| state.tenants.get(id))
        {
            return Ok((existing.clone(), false));
        }

        state
            .external_ids
            .insert(tenant.external_user_id.clone(), tenant.tenant_id);
        state.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok((tenant.clone(), true))
    }

    async fn find_tenant_by_external_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Tenant>, CreditError> {
        let state = self.state.lock().await;
        Ok(state
            .external_ids
            .get(external_user_id)
            .and_then(|id| state.tenants.get(id))
            .cloned())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, CreditError> {
        Ok(self.state.lock().await.tenants.get(&tenant_id).cloned())
    }

    async fn debit_if_sufficient(
        &self,
        debit: &NewDebit,
    ) -> Result<Option<CreditTransaction>, CreditError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::Debit)?;

        let balance = state.tenant_mut(debit.tenant_id)?.credits_balance;
        if balance < debit.amount {
            return Ok(None);
        }
        // Validate the session before mutating anything.
        state.session_mut(debit.tenant_id, debit.session_id)?;

        let now = Utc::now();
        let tenant = state.tenant_mut(debit.tenant_id)?;
        tenant.credits_balance -= debit.amount;
        tenant.updated_utc = now;
        let balance_after = tenant.credits_balance;

        let session = state.session_mut(debit.tenant_id, debit.session_id)?;
        session.credits_consumed += debit.amount;
        session.updated_utc = now;

        let transaction = CreditTransaction {
            transaction_id: Uuid::new_v4(),
            tenant_id: debit.tenant_id,
            amount: -debit.amount,
            balance_after,
            kind: TransactionKind::SessionAnalysis,
            session_id: Some(debit.session_id),
            external_payment_ref: None,
            description: debit.description.clone(),
            created_utc: now,
        };
        state
            .transactions
            .entry(debit.tenant_id)
            .or_default()
            .push(transaction.clone());

        Ok(Some(transaction))
    }

    async fn credit(&self, credit: &NewCredit) -> Result<CreditTransaction, CreditError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::Credit)?;

        let now = Utc::now();
        let tenant = state.tenant_mut(credit.tenant_id)?;
        tenant.credits_balance = tenant
            .credits_balance
            .checked_add(credit.amount)
            .ok_or_else(|| CreditError::InvalidInput("Credit would overflow the balance".into()))?;
        if credit.kind.counts_as_purchase() {
            tenant.credits_total_purchased += credit.amount;
        }
        tenant.updated_utc = now;
        let balance_after = tenant.credits_balance;

        let transaction = CreditTransaction {
            transaction_id: Uuid::new_v4(),
            tenant_id: credit.tenant_id,
            amount: credit.amount,
            balance_after,
            kind: credit.kind,
            session_id: None,
            external_payment_ref: credit.external_payment_ref.clone(),
            description: credit.description.clone(),
            created_utc: now,
        };
        state
            .transactions
            .entry(credit.tenant_id)
            .or_default()
            .push(transaction.clone());

        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(state
            .transactions
            .get(&tenant_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn credit_stats(&self, tenant_id: Uuid) -> Result<CreditStats, CreditError> {
        let state = self.state.lock().await;
        Ok(CreditStats::from_transactions(
            state.transactions.get(&tenant_id).into_iter().flatten(),
        ))
    }

    async fn reserve_storage(
        &self,
        tenant_id: Uuid,
        size_mb: Decimal,
    ) -> Result<Decimal, CreditError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::ReserveStorage)?;

        let tenant = state.tenant_mut(tenant_id)?;
        let proposed = tenant.current_storage_mb + size_mb;
        if proposed > tenant.max_storage_mb {
            return Err(CreditError::QuotaExceeded(format!(
                "Storage limit reached: {} MB used of {} MB, cannot add {} MB",
                tenant.current_storage_mb.normalize(),
                tenant.max_storage_mb.normalize(),
                size_mb.normalize()
            )));
        }
        tenant.current_storage_mb = proposed;
        tenant.updated_utc = Utc::now();
        Ok(proposed)
    }

    async fn release_storage(
        &self,
        tenant_id: Uuid,
        size_mb: Decimal,
    ) -> Result<Decimal, CreditError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::ReleaseStorage)?;

        let tenant = state.tenant_mut(tenant_id)?;
        tenant.current_storage_mb = (tenant.current_storage_mb - size_mb).max(Decimal::ZERO);
        tenant.updated_utc = Utc::now();
        Ok(tenant.current_storage_mb)
    }

    async fn count_active_patients(&self, tenant_id: Uuid) -> Result<i64, CreditError> {
        Ok(self.state.lock().await.active_patients(tenant_id))
    }

    async fn insert_patient_within_limit(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Patient, CreditError> {
        let mut state = self.state.lock().await;

        let ceiling = state.tenant_mut(tenant_id)?.max_patients;
        if let Some(ceiling) = ceiling {
            if state.active_patients(tenant_id) >= i64::from(ceiling) {
                return Err(CreditError::QuotaExceeded(format!(
                    "Patient limit reached: your plan allows {} active patients",
                    ceiling
                )));
            }
        }

        let patient = Patient {
            patient_id: Uuid::new_v4(),
            tenant_id,
            name: name.to_string(),
            is_active: true,
            created_utc: Utc::now(),
        };
        state.patients.insert(patient.patient_id, patient.clone());
        Ok(patient)
    }

    async fn deactivate_patient(
        &self,
        tenant_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(), CreditError> {
        let mut state = self.state.lock().await;
        let patient = state
            .patients
            .get_mut(&patient_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or(CreditError::PatientNotFound)?;
        patient.is_active = false;
        Ok(())
    }

    async fn list_active_patients(&self, tenant_id: Uuid) -> Result<Vec<Patient>, CreditError> {
        let state = self.state.lock().await;
        let mut patients: Vec<Patient> = state
            .patients
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.is_active)
            .cloned()
            .collect();
        patients.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(patients)
    }

    async fn get_patient(
        &self,
        tenant_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<Patient>, CreditError> {
        let state = self.state.lock().await;
        Ok(state
            .patients
            .get(&patient_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<Session, CreditError> {
        let mut state = self.state.lock().await;
        let owned = state
            .patients
            .get(&session.patient_id)
            .is_some_and(|p| p.tenant_id == session.tenant_id);
        if !owned {
            return Err(CreditError::PatientNotFound);
        }
        state.sessions.insert(session.session_id, session.clone());
        Ok(session.clone())
    }

    async fn get_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, CreditError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(&session_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_sessions(
        &self,
        tenant_id: Uuid,
        patient_id: Option<Uuid>,
    ) -> Result<Vec<Session>, CreditError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .filter(|s| patient_id.is_none_or(|id| s.patient_id == id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.session_date
                .cmp(&a.session_date)
                .then(b.created_utc.cmp(&a.created_utc))
        });
        Ok(sessions)
    }

    async fn attach_audio(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        storage_path: &str,
        size_mb: Decimal,
        duration_seconds: Option<i32>,
    ) -> Result<(), CreditError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::AttachAudio)?;

        let session = state.session_mut(tenant_id, session_id)?;
        if session.audio_storage_path.is_some() {
            return Err(CreditError::AudioAlreadyAttached);
        }
        session.audio_storage_path = Some(storage_path.to_string());
        session.audio_size_mb = Some(size_mb);
        session.audio_duration_seconds = duration_seconds;
        session.updated_utc = Utc::now();
        Ok(())
    }

    async fn detach_audio(&self, tenant_id: Uuid, session_id: Uuid) -> Result<(), CreditError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::DetachAudio)?;

        let session = state.session_mut(tenant_id, session_id)?;
        session.audio_storage_path = None;
        session.audio_size_mb = None;
        session.audio_duration_seconds = None;
        session.updated_utc = Utc::now();
        Ok(())
    }

    async fn begin_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, CreditError> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(tenant_id, session_id)?;
        if session.ai_processing_status == ProcessingStatus::Processing {
            return Ok(false);
        }
        session.ai_processing_status = ProcessingStatus::Processing;
        session.ai_error = None;
        session.updated_utc = Utc::now();
        Ok(true)
    }

    async fn fail_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        error: &str,
    ) -> Result<(), CreditError> {
        let mut state = self.state.lock().await;
        let session = state.session_mut(tenant_id, session_id)?;
        session.ai_processing_status = ProcessingStatus::Failed;
        session.ai_error = Some(error.to_string());
        session.updated_utc = Utc::now();
        Ok(())
    }

    async fn complete_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        outcome: &ProcessingOutcome,
    ) -> Result<(), CreditError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::CompleteProcessing)?;

        let now = Utc::now();
        let session = state.session_mut(tenant_id, session_id)?;
        session.ai_processing_status = ProcessingStatus::Completed;
        session.ai_processed_utc = Some(now);
        session.ai_error = None;
        session.transcription = Some(outcome.transcription.clone());
        session.analysis = Some(outcome.analysis.clone());
        session.metrics = Some(outcome.metrics.clone());
        session.updated_utc = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSession, NewTenant};
    use chrono::NaiveDate;

    async fn seeded() -> (InMemoryCreditStore, Tenant) {
        let store = InMemoryCreditStore::new();
        let tenant = NewTenant {
            external_user_id: "user_mem".to_string(),
            email: "mem@example.test".to_string(),
            display_name: None,
        }
        .into_trial_tenant(Utc::now());
        let (tenant, created) = store.insert_tenant(&tenant).await.unwrap();
        assert!(created);
        (store, tenant)
    }

    #[tokio::test]
    async fn insert_tenant_is_idempotent_per_external_id() {
        let (store, tenant) = seeded().await;
        let again = NewTenant {
            external_user_id: "user_mem".to_string(),
            email: "other@example.test".to_string(),
            display_name: None,
        }
        .into_trial_tenant(Utc::now());

        let (existing, created) = store.insert_tenant(&again).await.unwrap();
        assert!(!created);
        assert_eq!(existing.tenant_id, tenant.tenant_id);
        assert_eq!(existing.email, "mem@example.test");
    }

    #[tokio::test]
    async fn reserve_rejects_over_ceiling_without_change() {
        let (store, tenant) = seeded().await;
        store
            .reserve_storage(tenant.tenant_id, Decimal::from(48))
            .await
            .unwrap();

        let err = store
            .reserve_storage(tenant.tenant_id, Decimal::from(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::QuotaExceeded(_)));

        let current = store.get_tenant(tenant.tenant_id).await.unwrap().unwrap();
        assert_eq!(current.current_storage_mb, Decimal::from(48));
    }

    #[tokio::test]
    async fn release_floors_at_zero() {
        let (store, tenant) = seeded().await;
        store
            .reserve_storage(tenant.tenant_id, Decimal::from(5))
            .await
            .unwrap();

        let current = store
            .release_storage(tenant.tenant_id, Decimal::from(10))
            .await
            .unwrap();
        assert_eq!(current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn injected_failure_leaves_state_untouched() {
        let (store, tenant) = seeded().await;
        store.inject_failure(FailPoint::Credit).await;

        let err = store
            .credit(&NewCredit {
                tenant_id: tenant.tenant_id,
                amount: 10,
                kind: TransactionKind::Bonus,
                description: String::new(),
                external_payment_ref: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::StorageUnavailable(_)));

        let current = store.get_tenant(tenant.tenant_id).await.unwrap().unwrap();
        assert_eq!(current.credits_balance, 100);
        assert!(store
            .list_transactions(tenant.tenant_id, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn patient_ceiling_counts_only_active() {
        let (store, tenant) = seeded().await;
        let mut created = Vec::new();
        for i in 0..3 {
            created.push(
                store
                    .insert_patient_within_limit(tenant.tenant_id, &format!("p{}", i))
                    .await
                    .unwrap(),
            );
        }

        assert!(matches!(
            store
                .insert_patient_within_limit(tenant.tenant_id, "p3")
                .await,
            Err(CreditError::QuotaExceeded(_))
        ));

        store
            .deactivate_patient(tenant.tenant_id, created[0].patient_id)
            .await
            .unwrap();
        assert_eq!(store.count_active_patients(tenant.tenant_id).await.unwrap(), 2);
        store
            .insert_patient_within_limit(tenant.tenant_id, "p3")
            .await
            .unwrap();
    }

    async fn session_on(
        store: &InMemoryCreditStore,
        tenant: &Tenant,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Session {
        store
            .insert_session(
                &NewSession {
                    tenant_id: tenant.tenant_id,
                    patient_id,
                    session_date: date,
                    duration_minutes: 50,
                }
                .into_session(Utc::now()),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn attach_audio_refuses_a_second_recording() {
        let (store, tenant) = seeded().await;
        let patient = store
            .insert_patient_within_limit(tenant.tenant_id, "p")
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let session = session_on(&store, &tenant, patient.patient_id, date).await;

        store
            .attach_audio(tenant.tenant_id, session.session_id, "first.mp3", Decimal::ONE, Some(60))
            .await
            .unwrap();
        let err = store
            .attach_audio(tenant.tenant_id, session.session_id, "second.mp3", Decimal::TWO, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::AudioAlreadyAttached));

        let kept = store
            .get_session(tenant.tenant_id, session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.audio_storage_path.as_deref(), Some("first.mp3"));
        assert_eq!(kept.audio_size_mb, Some(Decimal::ONE));
    }

    #[tokio::test]
    async fn patient_and_session_reads_are_tenant_scoped() {
        let (store, tenant) = seeded().await;
        let other = NewTenant {
            external_user_id: "user_other".to_string(),
            email: "other@example.test".to_string(),
            display_name: None,
        }
        .into_trial_tenant(Utc::now());
        let (other, _) = store.insert_tenant(&other).await.unwrap();

        let first = store
            .insert_patient_within_limit(tenant.tenant_id, "first")
            .await
            .unwrap();
        let second = store
            .insert_patient_within_limit(tenant.tenant_id, "second")
            .await
            .unwrap();
        let foreign = store
            .insert_patient_within_limit(other.tenant_id, "foreign")
            .await
            .unwrap();
        store
            .deactivate_patient(tenant.tenant_id, first.patient_id)
            .await
            .unwrap();

        let active = store.list_active_patients(tenant.tenant_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].patient_id, second.patient_id);

        let inactive = store
            .get_patient(tenant.tenant_id, first.patient_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!inactive.is_active);
        assert!(store
            .get_patient(tenant.tenant_id, foreign.patient_id)
            .await
            .unwrap()
            .is_none());

        let older = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let newer = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        session_on(&store, &tenant, first.patient_id, older).await;
        let latest = session_on(&store, &tenant, second.patient_id, newer).await;
        session_on(&store, &other, foreign.patient_id, newer).await;

        let all = store.list_sessions(tenant.tenant_id, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, latest.session_id);
        assert_eq!(all[1].session_date, older);

        let for_first = store
            .list_sessions(tenant.tenant_id, Some(first.patient_id))
            .await
            .unwrap();
        assert_eq!(for_first.len(), 1);
        assert_eq!(for_first[0].patient_id, first.patient_id);
    }
}
