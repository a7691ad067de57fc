//! Credit ledger: the only writer of tenant balances.

use crate::models::{
    CreditSnapshot, CreditStats, CreditTransaction, NewCredit, NewDebit, TransactionKind,
};
use crate::services::metrics::{
    CREDITS_CREDITED_TOTAL, CREDITS_DEBITED_TOTAL, ERRORS_TOTAL, LEDGER_OPERATIONS_TOTAL,
};
use crate::services::{CreditError, CreditStore};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Upper bound for a single `list_transactions` page.
pub const MAX_TRANSACTION_PAGE: i64 = 500;

#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn CreditStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn get_balance(&self, tenant_id: Uuid) -> Result<CreditSnapshot, CreditError> {
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await?
            .ok_or(CreditError::TenantNotFound)?;
        Ok(CreditSnapshot::from(&tenant))
    }

    /// Advisory pre-flight check. `debit` re-checks atomically.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn has_sufficient_credits(
        &self,
        tenant_id: Uuid,
        required: i64,
    ) -> Result<bool, CreditError> {
        if required < 0 {
            return Err(CreditError::InvalidInput(format!(
                "Required credits must be non-negative, got {}",
                required
            )));
        }
        let snapshot = self.get_balance(tenant_id).await?;
        Ok(snapshot.balance >= required)
    }

    /// Subtract `amount` if the balance covers it.
    ///
    /// Returns `Ok(false)` and changes nothing when the balance is short.
    #[instrument(skip(self, description), fields(tenant_id = %tenant_id, session_id = %session_id))]
    pub async fn debit(
        &self,
        tenant_id: Uuid,
        amount: i64,
        session_id: Uuid,
        description: &str,
    ) -> Result<bool, CreditError> {
        if amount <= 0 {
            return Err(CreditError::InvalidInput(format!(
                "Debit amount must be positive, got {}",
                amount
            )));
        }

        let debit = NewDebit {
            tenant_id,
            amount,
            session_id,
            description: description.to_string(),
        };

        match self.store.debit_if_sufficient(&debit).await {
            Ok(Some(transaction)) => {
                LEDGER_OPERATIONS_TOTAL
                    .with_label_values(&["debit", "ok"])
                    .inc();
                CREDITS_DEBITED_TOTAL.inc_by(amount as u64);
                info!(
                    transaction_id = %transaction.transaction_id,
                    amount = amount,
                    balance_after = transaction.balance_after,
                    "Credits debited"
                );
                Ok(true)
            }
            Ok(None) => {
                LEDGER_OPERATIONS_TOTAL
                    .with_label_values(&["debit", "insufficient"])
                    .inc();
                warn!(amount = amount, "Debit refused: insufficient credits");
                Ok(false)
            }
            Err(e) => {
                LEDGER_OPERATIONS_TOTAL
                    .with_label_values(&["debit", "error"])
                    .inc();
                ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
                Err(e)
            }
        }
    }

    /// Add `amount` and return the new balance.
    #[instrument(skip(self, description, external_payment_ref), fields(tenant_id = %tenant_id, kind = %kind))]
    pub async fn credit(
        &self,
        tenant_id: Uuid,
        amount: i64,
        kind: TransactionKind,
        description: &str,
        external_payment_ref: Option<String>,
    ) -> Result<i64, CreditError> {
        if amount <= 0 {
            return Err(CreditError::InvalidInput(format!(
                "Credit amount must be positive, got {}",
                amount
            )));
        }
        if !kind.is_credit() {
            return Err(CreditError::InvalidInput(format!(
                "Transaction kind '{}' cannot be used to add credits",
                kind
            )));
        }

        let credit = NewCredit {
            tenant_id,
            amount,
            kind,
            description: description.to_string(),
            external_payment_ref,
        };

        let transaction = self.store.credit(&credit).await.inspect_err(|e| {
            LEDGER_OPERATIONS_TOTAL
                .with_label_values(&["credit", "error"])
                .inc();
            ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
        })?;

        LEDGER_OPERATIONS_TOTAL
            .with_label_values(&["credit", "ok"])
            .inc();
        CREDITS_CREDITED_TOTAL.inc_by(amount as u64);
        info!(
            transaction_id = %transaction.transaction_id,
            amount = amount,
            balance_after = transaction.balance_after,
            "Credits added"
        );

        Ok(transaction.balance_after)
    }

    /// Most recent first. `limit` is capped at [`MAX_TRANSACTION_PAGE`].
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CreditError> {
        if limit < 1 {
            return Err(CreditError::InvalidInput(format!(
                "Limit must be at least 1, got {}",
                limit
            )));
        }
        self.ensure_tenant(tenant_id).await?;
        self.store
            .list_transactions(tenant_id, limit.min(MAX_TRANSACTION_PAGE))
            .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn get_stats(&self, tenant_id: Uuid) -> Result<CreditStats, CreditError> {
        self.ensure_tenant(tenant_id).await?;
        self.store.credit_stats(tenant_id).await
    }

    async fn ensure_tenant(&self, tenant_id: Uuid) -> Result<(), CreditError> {
        self.store
            .get_tenant(tenant_id)
            .await?
            .map(|_| ())
            .ok_or(CreditError::TenantNotFound)
    }
}
