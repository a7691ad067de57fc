//! Paid transcription workflow: price, pre-check, run the provider, then debit.

use crate::models::{ProcessingOutcome, Tenant};
use crate::services::metrics::PROCESSING_RUNS_TOTAL;
use crate::services::{
    credits_for_minutes, CreditError, CreditLedger, CreditStore, ObjectStore,
    TranscriptionProvider,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Lifetime of the URL handed to the provider.
const PROVIDER_URL_TTL_SECONDS: u64 = 3600;

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedSession {
    pub session_id: Uuid,
    pub credits_charged: i64,
    pub outcome: ProcessingOutcome,
}

#[derive(Clone)]
pub struct ProcessingService {
    store: Arc<dyn CreditStore>,
    ledger: CreditLedger,
    objects: Arc<dyn ObjectStore>,
    provider: Arc<dyn TranscriptionProvider>,
}

impl ProcessingService {
    pub fn new(
        store: Arc<dyn CreditStore>,
        objects: Arc<dyn ObjectStore>,
        provider: Arc<dyn TranscriptionProvider>,
    ) -> Self {
        Self {
            ledger: CreditLedger::new(store.clone()),
            store,
            objects,
            provider,
        }
    }

    /// Transcribe and analyze a session's audio, charging credits only once
    /// the provider work has completed.
    ///
    /// Credits stay spent if saving the results fails afterwards.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.tenant_id, session_id = %session_id))]
    pub async fn process_session(
        &self,
        tenant: &Tenant,
        session_id: Uuid,
    ) -> Result<ProcessedSession, CreditError> {
        let tenant_id = tenant.tenant_id;
        let session = self
            .store
            .get_session(tenant_id, session_id)
            .await?
            .ok_or(CreditError::SessionNotFound)?;
        let storage_path = session.audio_storage_path.clone().ok_or_else(|| {
            CreditError::InvalidInput("Session has no audio to process".to_string())
        })?;

        let minutes = session.billable_minutes();
        let cost = credits_for_minutes(minutes)?;

        if !self.ledger.has_sufficient_credits(tenant_id, cost).await? {
            let available = self.ledger.get_balance(tenant_id).await?.balance;
            PROCESSING_RUNS_TOTAL
                .with_label_values(&["insufficient_credits"])
                .inc();
            return Err(CreditError::InsufficientCredits {
                required: cost,
                available,
            });
        }

        if !self.store.begin_processing(tenant_id, session_id).await? {
            return Err(CreditError::AlreadyProcessing);
        }

        let outcome = match self.run_provider(&storage_path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                PROCESSING_RUNS_TOTAL
                    .with_label_values(&["provider_failed"])
                    .inc();
                self.mark_failed(tenant_id, session_id, &e.to_string()).await;
                return Err(e);
            }
        };

        let description = format!("AI analysis of session {} ({:.1} min)", session_id, minutes);
        match self
            .ledger
            .debit(tenant_id, cost, session_id, &description)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let available = self
                    .ledger
                    .get_balance(tenant_id)
                    .await
                    .map(|s| s.balance)
                    .unwrap_or_default();
                let e = CreditError::InsufficientCredits {
                    required: cost,
                    available,
                };
                PROCESSING_RUNS_TOTAL
                    .with_label_values(&["insufficient_credits"])
                    .inc();
                self.mark_failed(tenant_id, session_id, &e.to_string()).await;
                return Err(e);
            }
            Err(e) => {
                PROCESSING_RUNS_TOTAL.with_label_values(&["debit_failed"]).inc();
                self.mark_failed(tenant_id, session_id, &e.to_string()).await;
                return Err(e);
            }
        }

        if let Err(e) = self
            .store
            .complete_processing(tenant_id, session_id, &outcome)
            .await
        {
            PROCESSING_RUNS_TOTAL
                .with_label_values(&["persist_failed"])
                .inc();
            error!(
                error = %e,
                credits_spent = cost,
                "Results not saved after debit; credits remain spent"
            );
            self.mark_failed(tenant_id, session_id, &e.to_string()).await;
            return Err(e);
        }

        PROCESSING_RUNS_TOTAL.with_label_values(&["completed"]).inc();
        info!(credits_charged = cost, "Session processed");

        Ok(ProcessedSession {
            session_id,
            credits_charged: cost,
            outcome,
        })
    }

    async fn run_provider(&self, storage_path: &str) -> Result<ProcessingOutcome, CreditError> {
        let audio_url = self
            .objects
            .signed_url(storage_path, PROVIDER_URL_TTL_SECONDS)
            .await?;

        let transcription = self.provider.transcribe(&audio_url).await?;
        let (analysis, metrics) = tokio::try_join!(
            self.provider.analyze(&transcription),
            self.provider.conversation_metrics(&transcription),
        )?;

        Ok(ProcessingOutcome {
            transcription,
            analysis,
            metrics,
        })
    }

    async fn mark_failed(&self, tenant_id: Uuid, session_id: Uuid, reason: &str) {
        if let Err(e) = self
            .store
            .fail_processing(tenant_id, session_id, reason)
            .await
        {
            warn!(error = %e, "Failed to mark session as failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewSession, NewTenant, ProcessingStatus, TransactionKind};
    use crate::services::providers::MockTranscriptionProvider;
    use crate::services::{FailPoint, InMemoryCreditStore, LocalObjectStore};
    use chrono::Utc;
    use rust_decimal::Decimal;

    struct Fixture {
        store: Arc<InMemoryCreditStore>,
        provider: Arc<MockTranscriptionProvider>,
        service: ProcessingService,
        ledger: CreditLedger,
        tenant: Tenant,
        session_id: Uuid,
    }

    /// Tenant with a session carrying `audio_seconds` of recorded audio.
    async fn fixture(audio_seconds: i32) -> Fixture {
        let store = Arc::new(InMemoryCreditStore::new());
        let (tenant, _) = store
            .insert_tenant(
                &NewTenant {
                    external_user_id: "user_proc".to_string(),
                    email: "proc@example.test".to_string(),
                    display_name: None,
                }
                .into_trial_tenant(Utc::now()),
            )
            .await
            .unwrap();
        let patient = store
            .insert_patient_within_limit(tenant.tenant_id, "Patient")
            .await
            .unwrap();
        let session = store
            .insert_session(
                &NewSession {
                    tenant_id: tenant.tenant_id,
                    patient_id: patient.patient_id,
                    session_date: Utc::now().date_naive(),
                    duration_minutes: 50,
                }
                .into_session(Utc::now()),
            )
            .await
            .unwrap();
        store
            .attach_audio(
                tenant.tenant_id,
                session.session_id,
                "user_proc/s/1.mp3",
                Decimal::ONE,
                Some(audio_seconds),
            )
            .await
            .unwrap();

        let provider = Arc::new(MockTranscriptionProvider::new());
        let objects = Arc::new(LocalObjectStore::new(
            std::env::temp_dir().join(format!("credits-proc-{}", Uuid::new_v4())),
            "http://localhost/objects",
            "secret",
        ));
        let service = ProcessingService::new(store.clone(), objects, provider.clone());

        Fixture {
            ledger: CreditLedger::new(store.clone()),
            store,
            provider,
            service,
            tenant,
            session_id: session.session_id,
        }
    }

    #[tokio::test]
    async fn ten_minutes_of_audio_costs_thirteen_credits() {
        let f = fixture(600).await;

        let processed = f
            .service
            .process_session(&f.tenant, f.session_id)
            .await
            .unwrap();
        assert_eq!(processed.credits_charged, 13);

        assert_eq!(f.ledger.get_balance(f.tenant.tenant_id).await.unwrap().balance, 87);
        let session = f
            .store
            .get_session(f.tenant.tenant_id, f.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.ai_processing_status, ProcessingStatus::Completed);
        assert_eq!(session.credits_consumed, 13);
        assert!(session.transcription.is_some());
        assert!(session.metrics.is_some());

        let history = f
            .ledger
            .list_transactions(f.tenant.tenant_id, 10)
            .await
            .unwrap();
        assert_eq!(history[0].kind, TransactionKind::SessionAnalysis);
        assert_eq!(history[0].session_id, Some(f.session_id));
    }

    #[tokio::test]
    async fn provider_failure_charges_nothing() {
        let f = fixture(600).await;
        f.provider.set_failing(true);

        let err = f
            .service
            .process_session(&f.tenant, f.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::Provider(_)));

        assert_eq!(f.ledger.get_balance(f.tenant.tenant_id).await.unwrap().balance, 100);
        let session = f
            .store
            .get_session(f.tenant.tenant_id, f.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.ai_processing_status, ProcessingStatus::Failed);
        assert!(session.ai_error.is_some());
        assert_eq!(session.credits_consumed, 0);
    }

    #[tokio::test]
    async fn insufficient_credits_skips_the_provider() {
        // 80 minutes -> 104 credits against a balance of 100.
        let f = fixture(80 * 60).await;

        let err = f
            .service
            .process_session(&f.tenant, f.session_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CreditError::InsufficientCredits {
                required: 104,
                available: 100
            }
        ));
        assert_eq!(err.shortfall(), Some(4));
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn persistence_failure_after_debit_keeps_credits_spent() {
        let f = fixture(600).await;
        f.store.inject_failure(FailPoint::CompleteProcessing).await;

        let err = f
            .service
            .process_session(&f.tenant, f.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::StorageUnavailable(_)));
        assert_eq!(f.ledger.get_balance(f.tenant.tenant_id).await.unwrap().balance, 87);
    }

    #[tokio::test]
    async fn session_without_audio_is_rejected() {
        let f = fixture(600).await;
        f.store
            .detach_audio(f.tenant.tenant_id, f.session_id)
            .await
            .unwrap();

        assert!(matches!(
            f.service.process_session(&f.tenant, f.session_id).await,
            Err(CreditError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn session_already_processing_is_a_conflict() {
        let f = fixture(600).await;
        assert!(f
            .store
            .begin_processing(f.tenant.tenant_id, f.session_id)
            .await
            .unwrap());

        assert!(matches!(
            f.service.process_session(&f.tenant, f.session_id).await,
            Err(CreditError::AlreadyProcessing)
        ));
        assert_eq!(f.ledger.get_balance(f.tenant.tenant_id).await.unwrap().balance, 100);
    }
}
