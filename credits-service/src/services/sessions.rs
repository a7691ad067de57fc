//! Session records that audio, credits and transcripts attach to.

use crate::models::{NewSession, Session};
use crate::services::{CreditError, CreditStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn CreditStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id, patient_id = %input.patient_id))]
    pub async fn create_session(&self, input: NewSession) -> Result<Session, CreditError> {
        if input.duration_minutes <= 0 {
            return Err(CreditError::InvalidInput(format!(
                "Session duration must be positive, got {} minutes",
                input.duration_minutes
            )));
        }

        let session = self
            .store
            .insert_session(&input.into_session(Utc::now()))
            .await?;
        info!(session_id = %session.session_id, "Session created");
        Ok(session)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id))]
    pub async fn get_session(&self, tenant_id: Uuid, session_id: Uuid) -> Result<Session, CreditError> {
        self.store
            .get_session(tenant_id, session_id)
            .await?
            .ok_or(CreditError::SessionNotFound)
    }

    /// Latest first. An unknown `patient_id` yields an empty list.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_sessions(
        &self,
        tenant_id: Uuid,
        patient_id: Option<Uuid>,
    ) -> Result<Vec<Session>, CreditError> {
        self.store.list_sessions(tenant_id, patient_id).await
    }
}
