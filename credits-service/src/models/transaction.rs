//! Credit transaction model (the audit trail).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Kind of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    SubscriptionRenewal,
    CreditPackPurchase,
    SessionAnalysis,
    Refund,
    Adjustment,
    Bonus,
}

impl TransactionKind {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionRenewal => "subscription_renewal",
            Self::CreditPackPurchase => "credit_pack_purchase",
            Self::SessionAnalysis => "session_analysis",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
            Self::Bonus => "bonus",
        }
    }

    /// Kinds accepted by `Credit`. Usage is the only debiting kind.
    pub fn is_credit(&self) -> bool {
        !matches!(self, Self::SessionAnalysis)
    }

    /// Kinds that count towards `credits_total_purchased`.
    pub fn counts_as_purchase(&self) -> bool {
        matches!(self, Self::SubscriptionRenewal | Self::CreditPackPurchase)
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscription_renewal" => Ok(Self::SubscriptionRenewal),
            "credit_pack_purchase" => Ok(Self::CreditPackPurchase),
            "session_analysis" => Ok(Self::SessionAnalysis),
            "refund" => Ok(Self::Refund),
            "adjustment" => Ok(Self::Adjustment),
            "bonus" => Ok(Self::Bonus),
            other => Err(format!("Unknown transaction kind: {}", other)),
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record of one balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    /// Negative = debit, positive = credit.
    pub amount: i64,
    /// Balance snapshot right after `amount` was applied.
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub session_id: Option<Uuid>,
    pub external_payment_ref: Option<String>,
    pub description: String,
    pub created_utc: DateTime<Utc>,
}

/// Input for a conditional debit.
#[derive(Debug, Clone)]
pub struct NewDebit {
    pub tenant_id: Uuid,
    pub amount: i64,
    pub session_id: Uuid,
    pub description: String,
}

/// Input for an unconditional credit.
#[derive(Debug, Clone)]
pub struct NewCredit {
    pub tenant_id: Uuid,
    pub amount: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub external_payment_ref: Option<String>,
}

/// Aggregates over a tenant's full transaction history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditStats {
    pub total_consumed: i64,
    pub total_added: i64,
    pub transactions_count: i64,
    pub last_transaction_date: Option<DateTime<Utc>>,
}

impl CreditStats {
    /// Fold a history (any order) into stats.
    pub fn from_transactions<'a>(transactions: impl IntoIterator<Item = &'a CreditTransaction>) -> Self {
        transactions
            .into_iter()
            .fold(Self::default(), |mut stats, tx| {
                if tx.amount < 0 {
                    stats.total_consumed += tx.amount.abs();
                } else {
                    stats.total_added += tx.amount;
                }
                stats.transactions_count += 1;
                stats.last_transaction_date = match stats.last_transaction_date {
                    Some(last) if last >= tx.created_utc => Some(last),
                    _ => Some(tx.created_utc),
                };
                stats
            })
    }
}
