//! PostgreSQL-backed store.

use super::CreditStore;
use crate::models::{
    ConversationMetrics, CreditStats, CreditTransaction, NewCredit, NewDebit, Patient,
    ProcessingOutcome, ProcessingStatus, Session, SessionInsights, SubscriptionPlan, Tenant,
    TransactionKind,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::CreditError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const TENANT_COLUMNS: &str = "tenant_id, external_user_id, email, display_name, subscription_plan, \
     credits_balance, credits_total_purchased, max_patients, max_storage_mb, current_storage_mb, \
     trial_started_utc, trial_ends_utc, is_trial_active, subscription_status, created_utc, updated_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, tenant_id, amount, balance_after, transaction_kind, \
     session_id, external_payment_ref, description, created_utc";

const PATIENT_COLUMNS: &str = "patient_id, tenant_id, name, is_active, created_utc";

const SESSION_COLUMNS: &str = "session_id, tenant_id, patient_id, session_date, duration_minutes, \
     audio_storage_path, audio_size_mb, audio_duration_seconds, credits_consumed, \
     ai_processing_status, ai_processed_utc, ai_error, transcription, analysis, metrics, \
     created_utc, updated_utc";

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> CreditError {
    move |e| CreditError::storage(context, e)
}

#[derive(Debug, FromRow)]
struct TenantRow {
    tenant_id: Uuid,
    external_user_id: String,
    email: String,
    display_name: Option<String>,
    subscription_plan: String,
    credits_balance: i64,
    credits_total_purchased: i64,
    max_patients: Option<i32>,
    max_storage_mb: Decimal,
    current_storage_mb: Decimal,
    trial_started_utc: Option<DateTime<Utc>>,
    trial_ends_utc: Option<DateTime<Utc>>,
    is_trial_active: bool,
    subscription_status: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = CreditError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let plan: SubscriptionPlan = row
            .subscription_plan
            .parse()
            .map_err(|e: String| CreditError::storage("Corrupt tenant row", e))?;

        Ok(Tenant {
            tenant_id: row.tenant_id,
            external_user_id: row.external_user_id,
            email: row.email,
            display_name: row.display_name,
            plan,
            credits_balance: row.credits_balance,
            credits_total_purchased: row.credits_total_purchased,
            max_patients: row.max_patients,
            max_storage_mb: row.max_storage_mb,
            current_storage_mb: row.current_storage_mb,
            trial_started_utc: row.trial_started_utc,
            trial_ends_utc: row.trial_ends_utc,
            is_trial_active: row.is_trial_active,
            subscription_status: row.subscription_status,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    transaction_id: Uuid,
    tenant_id: Uuid,
    amount: i64,
    balance_after: i64,
    transaction_kind: String,
    session_id: Option<Uuid>,
    external_payment_ref: Option<String>,
    description: String,
    created_utc: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for CreditTransaction {
    type Error = CreditError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind: TransactionKind = row
            .transaction_kind
            .parse()
            .map_err(|e: String| CreditError::storage("Corrupt transaction row", e))?;

        Ok(CreditTransaction {
            transaction_id: row.transaction_id,
            tenant_id: row.tenant_id,
            amount: row.amount,
            balance_after: row.balance_after,
            kind,
            session_id: row.session_id,
            external_payment_ref: row.external_payment_ref,
            description: row.description,
            created_utc: row.created_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct PatientRow {
    patient_id: Uuid,
    tenant_id: Uuid,
    name: String,
    is_active: bool,
    created_utc: DateTime<Utc>,
}

impl From<PatientRow> for Patient {
    fn from(row: PatientRow) -> Self {
        Patient {
            patient_id: row.patient_id,
            tenant_id: row.tenant_id,
            name: row.name,
            is_active: row.is_active,
            created_utc: row.created_utc,
        }
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    session_id: Uuid,
    tenant_id: Uuid,
    patient_id: Uuid,
    session_date: NaiveDate,
    duration_minutes: i32,
    audio_storage_path: Option<String>,
    audio_size_mb: Option<Decimal>,
    audio_duration_seconds: Option<i32>,
    credits_consumed: i64,
    ai_processing_status: String,
    ai_processed_utc: Option<DateTime<Utc>>,
    ai_error: Option<String>,
    transcription: Option<String>,
    analysis: Option<Json<SessionInsights>>,
    metrics: Option<Json<ConversationMetrics>>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = CreditError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status: ProcessingStatus = row
            .ai_processing_status
            .parse()
            .map_err(|e: String| CreditError::storage("Corrupt session row", e))?;

        Ok(Session {
            session_id: row.session_id,
            tenant_id: row.tenant_id,
            patient_id: row.patient_id,
            session_date: row.session_date,
            duration_minutes: row.duration_minutes,
            audio_storage_path: row.audio_storage_path,
            audio_size_mb: row.audio_size_mb,
            audio_duration_seconds: row.audio_duration_seconds,
            credits_consumed: row.credits_consumed,
            ai_processing_status: status,
            ai_processed_utc: row.ai_processed_utc,
            ai_error: row.ai_error,
            transcription: row.transcription,
            analysis: row.analysis.map(|j| j.0),
            metrics: row.metrics.map(|j| j.0),
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total_consumed: i64,
    total_added: i64,
    transactions_count: i64,
    last_transaction_date: Option<DateTime<Utc>>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgCreditStore {
    pool: PgPool,
}

impl PgCreditStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "credits-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, CreditError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(db_error("Failed to connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), CreditError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CreditError::storage("Migration failed", e))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn tenant_exists(&self, tenant_id: Uuid) -> Result<bool, CreditError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM tenants WHERE tenant_id = $1)")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to look up tenant"))
    }

    async fn session_exists(&self, tenant_id: Uuid, session_id: Uuid) -> Result<bool, CreditError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE tenant_id = $1 AND session_id = $2)",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to look up session"))
    }

    async fn update_session(
        &self,
        operation: &'static str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<(), CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let result = query
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to update session"))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(CreditError::SessionNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl CreditStore for PgCreditStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), CreditError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tenant Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, tenant), fields(external_user_id = %tenant.external_user_id))]
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(Tenant, bool), CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_tenant"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO tenants ({TENANT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (external_user_id) DO NOTHING
            RETURNING {TENANT_COLUMNS}
            "#
        );

        let inserted = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(tenant.tenant_id)
            .bind(&tenant.external_user_id)
            .bind(&tenant.email)
            .bind(&tenant.display_name)
            .bind(tenant.plan.as_str())
            .bind(tenant.credits_balance)
            .bind(tenant.credits_total_purchased)
            .bind(tenant.max_patients)
            .bind(tenant.max_storage_mb)
            .bind(tenant.current_storage_mb)
            .bind(tenant.trial_started_utc)
            .bind(tenant.trial_ends_utc)
            .bind(tenant.is_trial_active)
            .bind(&tenant.subscription_status)
            .bind(tenant.created_utc)
            .bind(tenant.updated_utc)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to create tenant"))?;

        timer.observe_duration();

        match inserted {
            Some(row) => Ok((row.try_into()?, true)),
            None => {
                // Lost the race to another onboarding request for the same user.
                let existing = self
                    .find_tenant_by_external_id(&tenant.external_user_id)
                    .await?
                    .ok_or(CreditError::TenantNotFound)?;
                Ok((existing, false))
            }
        }
    }

    #[instrument(skip(self))]
    async fn find_tenant_by_external_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<Tenant>, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_tenant"])
            .start_timer();

        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE external_user_id = $1");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(external_user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to fetch tenant"))?;

        timer.observe_duration();

        row.map(Tenant::try_from).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_tenant"])
            .start_timer();

        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE tenant_id = $1");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to fetch tenant"))?;

        timer.observe_duration();

        row.map(Tenant::try_from).transpose()
    }

    // -------------------------------------------------------------------------
    // Ledger Operations
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, debit),
        fields(tenant_id = %debit.tenant_id, session_id = %debit.session_id, amount = debit.amount)
    )]
    async fn debit_if_sufficient(
        &self,
        debit: &NewDebit,
    ) -> Result<Option<CreditTransaction>, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["debit_if_sufficient"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        // The conditional update is the compare-and-decrement; the row lock it
        // takes serializes concurrent debits and credits for the tenant.
        let new_balance = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE tenants
            SET credits_balance = credits_balance - $2, updated_utc = NOW()
            WHERE tenant_id = $1 AND credits_balance >= $2
            RETURNING credits_balance
            "#,
        )
        .bind(debit.tenant_id)
        .bind(debit.amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to debit credits"))?;

        let Some(new_balance) = new_balance else {
            tx.rollback().await.ok();
            timer.observe_duration();
            if !self.tenant_exists(debit.tenant_id).await? {
                return Err(CreditError::TenantNotFound);
            }
            return Ok(None);
        };

        let linked = sqlx::query(
            r#"
            UPDATE sessions
            SET credits_consumed = credits_consumed + $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND session_id = $2
            "#,
        )
        .bind(debit.tenant_id)
        .bind(debit.session_id)
        .bind(debit.amount)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to link debit to session"))?;

        if linked.rows_affected() == 0 {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Err(CreditError::SessionNotFound);
        }

        let sql = format!(
            r#"
            INSERT INTO credit_transactions
                (transaction_id, tenant_id, amount, balance_after, transaction_kind, session_id, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(debit.tenant_id)
            .bind(-debit.amount)
            .bind(new_balance)
            .bind(TransactionKind::SessionAnalysis.as_str())
            .bind(debit.session_id)
            .bind(&debit.description)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to record debit"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        timer.observe_duration();

        Ok(Some(row.try_into()?))
    }

    #[instrument(
        skip(self, credit),
        fields(tenant_id = %credit.tenant_id, amount = credit.amount, kind = %credit.kind)
    )]
    async fn credit(&self, credit: &NewCredit) -> Result<CreditTransaction, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["credit"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let new_balance = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE tenants
            SET credits_balance = credits_balance + $2,
                credits_total_purchased = credits_total_purchased + CASE WHEN $3 THEN $2 ELSE 0 END,
                updated_utc = NOW()
            WHERE tenant_id = $1
            RETURNING credits_balance
            "#,
        )
        .bind(credit.tenant_id)
        .bind(credit.amount)
        .bind(credit.kind.counts_as_purchase())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to credit balance"))?
        .ok_or(CreditError::TenantNotFound)?;

        let sql = format!(
            r#"
            INSERT INTO credit_transactions
                (transaction_id, tenant_id, amount, balance_after, transaction_kind, external_payment_ref, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(credit.tenant_id)
            .bind(credit.amount)
            .bind(new_balance)
            .bind(credit.kind.as_str())
            .bind(&credit.external_payment_ref)
            .bind(&credit.description)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to record credit"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        timer.observe_duration();

        row.try_into()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM credit_transactions
            WHERE tenant_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tenant_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list transactions"))?;

        timer.observe_duration();

        rows.into_iter().map(CreditTransaction::try_from).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn credit_stats(&self, tenant_id: Uuid) -> Result<CreditStats, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["credit_stats"])
            .start_timer();

        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COALESCE(SUM(-amount) FILTER (WHERE amount < 0), 0)::BIGINT AS total_consumed,
                COALESCE(SUM(amount) FILTER (WHERE amount > 0), 0)::BIGINT AS total_added,
                COUNT(*) AS transactions_count,
                MAX(created_utc) AS last_transaction_date
            FROM credit_transactions
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to aggregate transactions"))?;

        timer.observe_duration();

        Ok(CreditStats {
            total_consumed: row.total_consumed,
            total_added: row.total_added,
            transactions_count: row.transactions_count,
            last_transaction_date: row.last_transaction_date,
        })
    }

    // -------------------------------------------------------------------------
    // Storage Counter
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id, size_mb = %size_mb))]
    async fn reserve_storage(
        &self,
        tenant_id: Uuid,
        size_mb: Decimal,
    ) -> Result<Decimal, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reserve_storage"])
            .start_timer();

        let reserved = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE tenants
            SET current_storage_mb = current_storage_mb + $2, updated_utc = NOW()
            WHERE tenant_id = $1 AND current_storage_mb + $2 <= max_storage_mb
            RETURNING current_storage_mb
            "#,
        )
        .bind(tenant_id)
        .bind(size_mb)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to reserve storage"))?;

        timer.observe_duration();

        match reserved {
            Some(current) => Ok(current),
            None => {
                let tenant = self
                    .get_tenant(tenant_id)
                    .await?
                    .ok_or(CreditError::TenantNotFound)?;
                Err(CreditError::QuotaExceeded(format!(
                    "Storage limit reached: {} MB used of {} MB, cannot add {} MB",
                    tenant.current_storage_mb.normalize(),
                    tenant.max_storage_mb.normalize(),
                    size_mb.normalize()
                )))
            }
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, size_mb = %size_mb))]
    async fn release_storage(
        &self,
        tenant_id: Uuid,
        size_mb: Decimal,
    ) -> Result<Decimal, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["release_storage"])
            .start_timer();

        let current = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE tenants
            SET current_storage_mb = GREATEST(current_storage_mb - $2, 0), updated_utc = NOW()
            WHERE tenant_id = $1
            RETURNING current_storage_mb
            "#,
        )
        .bind(tenant_id)
        .bind(size_mb)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to release storage"))?
        .ok_or(CreditError::TenantNotFound)?;

        timer.observe_duration();

        Ok(current)
    }

    // -------------------------------------------------------------------------
    // Patient Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn count_active_patients(&self, tenant_id: Uuid) -> Result<i64, CreditError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM patients WHERE tenant_id = $1 AND is_active",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count patients"))
    }

    #[instrument(skip(self, name), fields(tenant_id = %tenant_id))]
    async fn insert_patient_within_limit(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Patient, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_patient"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let ceiling = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT max_patients FROM tenants WHERE tenant_id = $1 FOR UPDATE",
        )
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to lock tenant"))?
        .ok_or(CreditError::TenantNotFound)?;

        let active = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM patients WHERE tenant_id = $1 AND is_active",
        )
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to count patients"))?;

        if let Some(ceiling) = ceiling {
            if active >= i64::from(ceiling) {
                tx.rollback().await.ok();
                timer.observe_duration();
                return Err(CreditError::QuotaExceeded(format!(
                    "Patient limit reached: your plan allows {} active patients",
                    ceiling
                )));
            }
        }

        let sql = format!(
            r#"
            INSERT INTO patients (patient_id, tenant_id, name, is_active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING {PATIENT_COLUMNS}
            "#
        );
        let patient = sqlx::query_as::<_, PatientRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to create patient"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))?;

        timer.observe_duration();

        Ok(patient.into())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, patient_id = %patient_id))]
    async fn deactivate_patient(
        &self,
        tenant_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(), CreditError> {
        let result = sqlx::query(
            "UPDATE patients SET is_active = FALSE WHERE tenant_id = $1 AND patient_id = $2",
        )
        .bind(tenant_id)
        .bind(patient_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to deactivate patient"))?;

        if result.rows_affected() == 0 {
            return Err(CreditError::PatientNotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_active_patients(&self, tenant_id: Uuid) -> Result<Vec<Patient>, CreditError> {
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE tenant_id = $1 AND is_active \
             ORDER BY created_utc DESC"
        );
        let rows = sqlx::query_as::<_, PatientRow>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list patients"))?;

        Ok(rows.into_iter().map(Patient::from).collect())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, patient_id = %patient_id))]
    async fn get_patient(
        &self,
        tenant_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<Patient>, CreditError> {
        let sql =
            format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE tenant_id = $1 AND patient_id = $2");
        let row = sqlx::query_as::<_, PatientRow>(&sql)
            .bind(tenant_id)
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to fetch patient"))?;

        Ok(row.map(Patient::from))
    }

    // -------------------------------------------------------------------------
    // Session Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, session), fields(tenant_id = %session.tenant_id, session_id = %session.session_id))]
    async fn insert_session(&self, session: &Session) -> Result<Session, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_session"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO sessions (session_id, tenant_id, patient_id, session_date, duration_minutes, ai_processing_status)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE EXISTS (SELECT 1 FROM patients WHERE patient_id = $3 AND tenant_id = $2)
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session.session_id)
            .bind(session.tenant_id)
            .bind(session.patient_id)
            .bind(session.session_date)
            .bind(session.duration_minutes)
            .bind(session.ai_processing_status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to create session"))?
            .ok_or(CreditError::PatientNotFound)?;

        timer.observe_duration();

        row.try_into()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id))]
    async fn get_session(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<Session>, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_session"])
            .start_timer();

        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE tenant_id = $1 AND session_id = $2");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(tenant_id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to fetch session"))?;

        timer.observe_duration();

        row.map(Session::try_from).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn list_sessions(
        &self,
        tenant_id: Uuid,
        patient_id: Option<Uuid>,
    ) -> Result<Vec<Session>, CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_sessions"])
            .start_timer();

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE tenant_id = $1 AND ($2::uuid IS NULL OR patient_id = $2) \
             ORDER BY session_date DESC, created_utc DESC"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(tenant_id)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list sessions"))?;

        timer.observe_duration();

        rows.into_iter().map(Session::try_from).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id))]
    async fn attach_audio(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        storage_path: &str,
        size_mb: Decimal,
        duration_seconds: Option<i32>,
    ) -> Result<(), CreditError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["attach_audio"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET audio_storage_path = $3, audio_size_mb = $4, audio_duration_seconds = $5, updated_utc = NOW()
            WHERE tenant_id = $1 AND session_id = $2 AND audio_storage_path IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(storage_path)
        .bind(size_mb)
        .bind(duration_seconds)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to attach audio"))?;

        timer.observe_duration();

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE tenant_id = $1 AND session_id = $2)",
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to look up session"))?;

        if exists {
            Err(CreditError::AudioAlreadyAttached)
        } else {
            Err(CreditError::SessionNotFound)
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id))]
    async fn detach_audio(&self, tenant_id: Uuid, session_id: Uuid) -> Result<(), CreditError> {
        let query = sqlx::query(
            r#"
            UPDATE sessions
            SET audio_storage_path = NULL, audio_size_mb = NULL, audio_duration_seconds = NULL, updated_utc = NOW()
            WHERE tenant_id = $1 AND session_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(session_id);

        self.update_session("detach_audio", query).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, session_id = %session_id))]
    async fn begin_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, CreditError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET ai_processing_status = 'processing', ai_error = NULL, updated_utc = NOW()
            WHERE tenant_id = $1 AND session_id = $2 AND ai_processing_status <> 'processing'
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark session processing"))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.session_exists(tenant_id, session_id).await? {
            warn!("Session is already being processed");
            Ok(false)
        } else {
            Err(CreditError::SessionNotFound)
        }
    }

    #[instrument(skip(self, error), fields(tenant_id = %tenant_id, session_id = %session_id))]
    async fn fail_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        error: &str,
    ) -> Result<(), CreditError> {
        let query = sqlx::query(
            r#"
            UPDATE sessions
            SET ai_processing_status = 'failed', ai_error = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND session_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(error);

        self.update_session("fail_processing", query).await
    }

    #[instrument(skip(self, outcome), fields(tenant_id = %tenant_id, session_id = %session_id))]
    async fn complete_processing(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        outcome: &ProcessingOutcome,
    ) -> Result<(), CreditError> {
        let query = sqlx::query(
            r#"
            UPDATE sessions
            SET ai_processing_status = 'completed',
                ai_processed_utc = NOW(),
                ai_error = NULL,
                transcription = $3,
                analysis = $4,
                metrics = $5,
                updated_utc = NOW()
            WHERE tenant_id = $1 AND session_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(&outcome.transcription)
        .bind(Json(&outcome.analysis))
        .bind(Json(&outcome.metrics));

        self.update_session("complete_processing", query).await
    }
}
