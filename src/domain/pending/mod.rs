//! Pending-transaction domain - amounts earmarked by in-flight operations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::ledger::{NewRecord, RecordContent, RecordFilter, RecordKind, RecordStore};
use crate::shared::errors::{LedgerError, ReserveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    Swap,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub transaction_id: String,
    pub kind: PendingKind,
    pub from_token: String,
    pub amount: Decimal,
    pub expires_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(
        transaction_id: impl Into<String>,
        kind: PendingKind,
        from_token: impl Into<String>,
        amount: Decimal,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(10));
        Self {
            transaction_id: transaction_id.into(),
            kind,
            from_token: from_token.into(),
            amount,
            expires_at: Utc::now() + ttl,
        }
    }

    fn exclusive_key(transaction_id: &str) -> String {
        format!("pending-{}", transaction_id)
    }
}

/// Handle to a registered reservation
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub transaction_id: String,
    pub token: String,
    pub amount: Decimal,
}

/// Tracks earmarked amounts per token so concurrent operations cannot overdraw
/// the treasury. Reservations are exclusive records keyed by transaction id and
/// stop counting once they expire.
pub struct PendingLedger {
    store: Arc<dyn RecordStore>,
    /// Serializes check-then-register
    admission: Mutex<()>,
}

impl PendingLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            admission: Mutex::new(()),
        }
    }

    /// Σ of unexpired pending amounts drawing on `token`
    pub async fn pending_total(&self, token: &str) -> Result<Decimal, LedgerError> {
        let records = self
            .store
            .query(&RecordFilter::kind(RecordKind::PendingTransaction))
            .await?;
        let now = Utc::now();
        Ok(records
            .iter()
            .filter_map(|record| match &record.content {
                RecordContent::PendingTransaction(pending) => Some(pending),
                _ => None,
            })
            .filter(|pending| pending.from_token == token && pending.expires_at > now)
            .map(|pending| pending.amount)
            .sum())
    }

    /// `current − Σ unexpired pending` for `token`
    pub async fn available_balance(
        &self,
        token: &str,
        current: Decimal,
    ) -> Result<Decimal, LedgerError> {
        Ok(current - self.pending_total(token).await?)
    }

    /// Register `pending` if the token's available balance still covers it
    pub async fn reserve(
        &self,
        pending: PendingTransaction,
        current: Decimal,
    ) -> Result<Reservation, ReserveError> {
        let _admission = self.admission.lock().await;

        let available = self.available_balance(&pending.from_token, current).await?;
        if pending.amount > available {
            return Err(ReserveError::Insufficient {
                requested: pending.amount,
                available,
            });
        }

        let key = PendingTransaction::exclusive_key(&pending.transaction_id);
        let reservation = Reservation {
            transaction_id: pending.transaction_id.clone(),
            token: pending.from_token.clone(),
            amount: pending.amount,
        };
        let record = NewRecord::new(RecordContent::PendingTransaction(pending.clone()))
            .correlated(pending.transaction_id.clone())
            .expiring_at(pending.expires_at);

        match self.store.create_exclusive(&key, record).await? {
            Some(_) => {
                info!(
                    transaction_id = %reservation.transaction_id,
                    token = %reservation.token,
                    amount = %reservation.amount,
                    "📌 pending reservation registered"
                );
                Ok(reservation)
            }
            None => Err(ReserveError::Duplicate(pending.transaction_id)),
        }
    }

    /// Remove the reservation for `transaction_id`; unknown ids are ignored
    pub async fn release(&self, transaction_id: &str) -> Result<(), LedgerError> {
        let key = PendingTransaction::exclusive_key(transaction_id);
        let filter = RecordFilter {
            include_expired: true,
            ..RecordFilter::kind(RecordKind::PendingTransaction).correlated(transaction_id)
        };
        for record in self.store.query(&filter).await? {
            if self.store.remove_exclusive(&key, record.id).await? {
                debug!(transaction_id, "pending reservation released");
            }
        }
        Ok(())
    }

    /// Whether a live reservation exists for `transaction_id`
    pub async fn is_pending(&self, transaction_id: &str) -> Result<bool, LedgerError> {
        let records = self
            .store
            .query(&RecordFilter::kind(RecordKind::PendingTransaction).correlated(transaction_id))
            .await?;
        Ok(!records.is_empty())
    }
}
