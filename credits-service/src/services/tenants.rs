//! Tenant onboarding and caller resolution.

use crate::models::{NewTenant, PlanLimits, Tenant};
use crate::services::{CreditError, CreditStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

/// Result of an onboarding call.
#[derive(Debug, Clone)]
pub struct Onboarded {
    pub tenant: Tenant,
    pub created: bool,
}

#[derive(Clone)]
pub struct TenantService {
    store: Arc<dyn CreditStore>,
}

impl TenantService {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    /// Create the trial tenant for `external_user_id`, or return the existing one.
    #[instrument(skip(self, input), fields(external_user_id = %input.external_user_id))]
    pub async fn onboard(&self, input: NewTenant) -> Result<Onboarded, CreditError> {
        if input.external_user_id.trim().is_empty() {
            return Err(CreditError::Unauthenticated);
        }
        if input.email.trim().is_empty() || !input.email.contains('@') {
            return Err(CreditError::InvalidInput(format!(
                "A valid email is required, got '{}'",
                input.email
            )));
        }

        if let Some(tenant) = self
            .store
            .find_tenant_by_external_id(&input.external_user_id)
            .await?
        {
            return Ok(Onboarded {
                tenant,
                created: false,
            });
        }

        let (tenant, created) = self
            .store
            .insert_tenant(&input.into_trial_tenant(Utc::now()))
            .await?;

        if created {
            info!(
                tenant_id = %tenant.tenant_id,
                credits = tenant.credits_balance,
                "Tenant onboarded on trial"
            );
        }

        Ok(Onboarded { tenant, created })
    }

    /// Whether a tenant exists for the identity. Never fails for strangers.
    #[instrument(skip(self))]
    pub async fn exists(&self, external_user_id: Option<&str>) -> Result<bool, CreditError> {
        match external_user_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(self.store.find_tenant_by_external_id(id).await?.is_some()),
            None => Ok(false),
        }
    }

    /// Map the identity provider's user id to a tenant.
    #[instrument(skip(self))]
    pub async fn resolve_caller(
        &self,
        external_user_id: Option<&str>,
    ) -> Result<Tenant, CreditError> {
        let id = external_user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(CreditError::Unauthenticated)?;

        self.store
            .find_tenant_by_external_id(id)
            .await?
            .ok_or(CreditError::TenantNotFound)
    }

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.tenant_id))]
    pub async fn plan_limits(&self, tenant: &Tenant) -> Result<PlanLimits, CreditError> {
        let patients_count = self.store.count_active_patients(tenant.tenant_id).await?;
        Ok(PlanLimits {
            can_create_patient: tenant
                .max_patients
                .map_or(true, |ceiling| patients_count < i64::from(ceiling)),
            can_upload_audio: tenant.current_storage_mb < tenant.max_storage_mb,
            patients_count,
            patients_limit: tenant.max_patients,
            storage_used_mb: tenant.current_storage_mb,
            storage_limit_mb: tenant.max_storage_mb,
            credits_remaining: tenant.credits_balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryCreditStore;
    use rust_decimal::Decimal;

    fn new_tenant(external_user_id: &str) -> NewTenant {
        NewTenant {
            external_user_id: external_user_id.to_string(),
            email: format!("{}@example.test", external_user_id),
            display_name: Some("Dr. Test".to_string()),
        }
    }

    #[tokio::test]
    async fn onboarding_twice_returns_the_same_tenant() {
        let service = TenantService::new(Arc::new(InMemoryCreditStore::new()));

        let first = service.onboard(new_tenant("user_a")).await.unwrap();
        assert!(first.created);
        assert_eq!(first.tenant.credits_balance, 100);

        let second = service.onboard(new_tenant("user_a")).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.tenant.tenant_id, first.tenant.tenant_id);
    }

    #[tokio::test]
    async fn onboarding_requires_an_email() {
        let service = TenantService::new(Arc::new(InMemoryCreditStore::new()));
        let mut input = new_tenant("user_b");
        input.email = "not-an-email".to_string();

        assert!(matches!(
            service.onboard(input).await,
            Err(CreditError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn resolve_caller_distinguishes_missing_identity_and_tenant() {
        let service = TenantService::new(Arc::new(InMemoryCreditStore::new()));

        assert!(matches!(
            service.resolve_caller(None).await,
            Err(CreditError::Unauthenticated)
        ));
        assert!(matches!(
            service.resolve_caller(Some("  ")).await,
            Err(CreditError::Unauthenticated)
        ));
        assert!(matches!(
            service.resolve_caller(Some("user_c")).await,
            Err(CreditError::TenantNotFound)
        ));
        assert!(!service.exists(Some("user_c")).await.unwrap());

        service.onboard(new_tenant("user_c")).await.unwrap();
        assert!(service.exists(Some("user_c")).await.unwrap());
        assert!(service.resolve_caller(Some("user_c")).await.is_ok());
    }

    #[tokio::test]
    async fn plan_limits_for_fresh_trial() {
        let service = TenantService::new(Arc::new(InMemoryCreditStore::new()));
        let tenant = service.onboard(new_tenant("user_d")).await.unwrap().tenant;

        let limits = service.plan_limits(&tenant).await.unwrap();
        assert!(limits.can_create_patient);
        assert!(limits.can_upload_audio);
        assert_eq!(limits.patients_count, 0);
        assert_eq!(limits.patients_limit, Some(3));
        assert_eq!(limits.storage_used_mb, Decimal::ZERO);
        assert_eq!(limits.storage_limit_mb, Decimal::from(50));
        assert_eq!(limits.credits_remaining, 100);
    }
}
