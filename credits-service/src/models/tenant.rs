//! Tenant (professional account) model.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Credits granted once at onboarding.
pub const TRIAL_CREDITS: i64 = 100;
/// Active patient ceiling during the trial.
pub const TRIAL_MAX_PATIENTS: i32 = 3;
/// Storage ceiling during the trial, in MB.
pub const TRIAL_MAX_STORAGE_MB: i64 = 50;
/// Length of the trial window.
pub const TRIAL_DAYS: i64 = 14;

/// Subscription plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    Trial,
    Solo,
    Practice,
    Professional,
}

impl SubscriptionPlan {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Solo => "solo",
            Self::Practice => "practice",
            Self::Professional => "professional",
        }
    }

    /// Credits granted per billing month. The trial figure is a one-off total.
    pub fn monthly_credits(&self) -> i64 {
        match self {
            Self::Trial => TRIAL_CREDITS,
            Self::Solo => 250,
            Self::Practice => 1200,
            Self::Professional => 3200,
        }
    }
}

impl FromStr for SubscriptionPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Self::Trial),
            "solo" => Ok(Self::Solo),
            "practice" => Ok(Self::Practice),
            "professional" => Ok(Self::Professional),
            other => Err(format!("Unknown subscription plan: {}", other)),
        }
    }
}

impl std::fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A professional account.
///
/// `credits_balance` and `current_storage_mb` are only ever changed through
/// the store's atomic ledger and quota operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub external_user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub plan: SubscriptionPlan,
    pub credits_balance: i64,
    pub credits_total_purchased: i64,
    /// `None` means unlimited.
    pub max_patients: Option<i32>,
    pub max_storage_mb: Decimal,
    pub current_storage_mb: Decimal,
    pub trial_started_utc: Option<DateTime<Utc>>,
    pub trial_ends_utc: Option<DateTime<Utc>>,
    pub is_trial_active: bool,
    pub subscription_status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a tenant at onboarding.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub external_user_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl NewTenant {
    /// Build the tenant row with the fixed trial allotment.
    pub fn into_trial_tenant(self, now: DateTime<Utc>) -> Tenant {
        Tenant {
            tenant_id: Uuid::new_v4(),
            external_user_id: self.external_user_id,
            email: self.email,
            display_name: self.display_name,
            plan: SubscriptionPlan::Trial,
            credits_balance: TRIAL_CREDITS,
            credits_total_purchased: 0,
            max_patients: Some(TRIAL_MAX_PATIENTS),
            max_storage_mb: Decimal::from(TRIAL_MAX_STORAGE_MB),
            current_storage_mb: Decimal::ZERO,
            trial_started_utc: Some(now),
            trial_ends_utc: Some(now + Duration::days(TRIAL_DAYS)),
            is_trial_active: true,
            subscription_status: "trialing".to_string(),
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Read-only balance view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSnapshot {
    pub balance: i64,
    pub plan: SubscriptionPlan,
    pub total_purchased: i64,
    pub monthly_allotment: i64,
}

impl From<&Tenant> for CreditSnapshot {
    fn from(tenant: &Tenant) -> Self {
        Self {
            balance: tenant.credits_balance,
            plan: tenant.plan,
            total_purchased: tenant.credits_total_purchased,
            monthly_allotment: tenant.plan.monthly_credits(),
        }
    }
}

/// Advisory storage check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAvailability {
    pub can_upload: bool,
    pub current_mb: Decimal,
    pub max_mb: Decimal,
    pub available_mb: Decimal,
}

impl StorageAvailability {
    pub fn evaluate(current_mb: Decimal, max_mb: Decimal, file_size_mb: Decimal) -> Self {
        let available_mb = max_mb - current_mb;
        Self {
            can_upload: available_mb >= file_size_mb,
            current_mb,
            max_mb,
            available_mb,
        }
    }
}

/// Summary of plan ceilings and current usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub can_create_patient: bool,
    pub can_upload_audio: bool,
    pub patients_count: i64,
    pub patients_limit: Option<i32>,
    pub storage_used_mb: Decimal,
    pub storage_limit_mb: Decimal,
    pub credits_remaining: i64,
}
