//! Plan ceilings: storage and active patients.

use crate::models::{Patient, StorageAvailability};
use crate::services::metrics::QUOTA_REJECTIONS_TOTAL;
use crate::services::{CreditError, CreditStore};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

fn validate_size(file_size_mb: Decimal) -> Result<(), CreditError> {
    if file_size_mb.is_sign_negative() {
        return Err(CreditError::InvalidInput(format!(
            "File size must be non-negative, got {} MB",
            file_size_mb
        )));
    }
    Ok(())
}

/// Storage-quota guard over the tenant's `current_storage_mb` counter.
#[derive(Clone)]
pub struct StorageQuotaGuard {
    store: Arc<dyn CreditStore>,
}

impl StorageQuotaGuard {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    /// Advisory only; `reserve_on_upload` is the authoritative check.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, file_size_mb = %file_size_mb))]
    pub async fn check_available(
        &self,
        tenant_id: Uuid,
        file_size_mb: Decimal,
    ) -> Result<StorageAvailability, CreditError> {
        validate_size(file_size_mb)?;
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or(CreditError::TenantNotFound)?;
        Ok(StorageAvailability::evaluate(
            tenant.current_storage_mb,
            tenant.max_storage_mb,
            file_size_mb,
        ))
    }

    /// Returns the new usage in MB.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, file_size_mb = %file_size_mb))]
    pub async fn reserve_on_upload(
        &self,
        tenant_id: Uuid,
        file_size_mb: Decimal,
    ) -> Result<Decimal, CreditError> {
        validate_size(file_size_mb)?;
        match self.store.reserve_storage(tenant_id, file_size_mb).await {
            Ok(current) => {
                info!(current_mb = %current, "Storage reserved");
                Ok(current)
            }
            Err(e @ CreditError::QuotaExceeded(_)) => {
                QUOTA_REJECTIONS_TOTAL.with_label_values(&["storage"]).inc();
                warn!(error = %e, "Storage reservation refused");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Floors at zero. Returns the new usage in MB.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, file_size_mb = %file_size_mb))]
    pub async fn release_on_delete(
        &self,
        tenant_id: Uuid,
        file_size_mb: Decimal,
    ) -> Result<Decimal, CreditError> {
        validate_size(file_size_mb)?;
        let current = self.store.release_storage(tenant_id, file_size_mb).await?;
        info!(current_mb = %current, "Storage released");
        Ok(current)
    }
}

/// Patient-count guard over active patients.
#[derive(Clone)]
pub struct PatientQuotaGuard {
    store: Arc<dyn CreditStore>,
}

impl PatientQuotaGuard {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn can_create_patient(&self, tenant_id: Uuid) -> Result<bool, CreditError> {
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or(CreditError::TenantNotFound)?;
        let Some(ceiling) = tenant.max_patients else {
            return Ok(true);
        };
        let active = self.store.count_active_patients(tenant_id).await?;
        Ok(active < i64::from(ceiling))
    }

    /// Create an active patient, refusing with `QuotaExceeded` at the ceiling.
    #[instrument(skip(self, name), fields(tenant_id = %tenant_id))]
    pub async fn create_patient(&self, tenant_id: Uuid, name: &str) -> Result<Patient, CreditError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CreditError::InvalidInput(
                "Patient name must not be empty".to_string(),
            ));
        }

        match self.store.insert_patient_within_limit(tenant_id, name).await {
            Ok(patient) => {
                info!(patient_id = %patient.patient_id, "Patient created");
                Ok(patient)
            }
            Err(e @ CreditError::QuotaExceeded(_)) => {
                QUOTA_REJECTIONS_TOTAL
                    .with_label_values(&["patients"])
                    .inc();
                warn!(error = %e, "Patient creation refused");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_patients(&self, tenant_id: Uuid) -> Result<Vec<Patient>, CreditError> {
        self.store.list_active_patients(tenant_id).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, patient_id = %patient_id))]
    pub async fn get_patient(&self, tenant_id: Uuid, patient_id: Uuid) -> Result<Patient, CreditError> {
        self.store
            .get_patient(tenant_id, patient_id)
            .await?
            .ok_or(CreditError::PatientNotFound)
    }

    /// Soft delete; frees a slot under the ceiling.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, patient_id = %patient_id))]
    pub async fn deactivate_patient(
        &self,
        tenant_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(), CreditError> {
        self.store.deactivate_patient(tenant_id, patient_id).await?;
        info!("Patient deactivated");
        Ok(())
    }
}
