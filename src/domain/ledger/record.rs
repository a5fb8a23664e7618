//! Ledger records and the closed set of record kinds

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pending::PendingTransaction;
use crate::domain::position::{ExitType, Position, PositionStatus};
use crate::domain::swap::{SwapReason, SwapRequest, SwapResult, SwapStatus, TreasuryTransaction};
use crate::shared::errors::LedgerError;

pub type RecordId = Uuid;

/// Lock ownership as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,
    pub holder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapExecutionResult {
    pub request_id: String,
    pub result: SwapResult,
}

/// Notification for components interested in finished swaps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapCompleted {
    pub request_id: String,
    pub from_token: String,
    pub to_token: String,
    pub signature: String,
    pub reason: SwapReason,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapFailed {
    pub request_id: String,
    /// Last lifecycle stage reached before the failure
    pub stage: SwapStatus,
    pub error: String,
    pub reason: SwapReason,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position_id: String,
    pub exit_type: ExitType,
    pub amount: Decimal,
    /// Realized fill price
    pub price: Decimal,
    /// Reference price that triggered the exit
    pub trigger_price: Decimal,
    pub output_amount: Decimal,
    pub signature: String,
    pub remaining_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStatusChange {
    pub position_id: String,
    pub status: PositionStatus,
    pub note: String,
}

/// Inbound deposit observed by the treasury
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositContent {
    pub token: String,
    pub amount: Decimal,
    pub from: String,
    pub signature: Option<String>,
}

/// Transfer intent produced by the command or governance layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferContent {
    pub token: String,
    pub amount: Decimal,
    pub recipient: String,
    pub proposal_id: Option<String>,
}

/// Strategy-originated request to act on a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyExecutionRequest {
    pub strategy_id: String,
    pub position_id: String,
    pub exit_type: ExitType,
    pub amount: Decimal,
}

/// Every kind of record the core reads or writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RecordContent {
    SwapRequest(SwapRequest),
    TreasuryTransaction(TreasuryTransaction),
    SwapExecutionResult(SwapExecutionResult),
    SwapCompleted(SwapCompleted),
    SwapFailed(SwapFailed),
    Lock(LockRecord),
    PendingTransaction(PendingTransaction),
    Position(Position),
    PositionUpdate(PositionUpdate),
    PositionStatus(PositionStatusChange),
    Deposit(DepositContent),
    Transfer(TransferContent),
    StrategyExecutionRequest(StrategyExecutionRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    SwapRequest,
    TreasuryTransaction,
    SwapExecutionResult,
    SwapCompleted,
    SwapFailed,
    Lock,
    PendingTransaction,
    Position,
    PositionUpdate,
    PositionStatus,
    Deposit,
    Transfer,
    StrategyExecutionRequest,
}

impl RecordContent {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordContent::SwapRequest(_) => RecordKind::SwapRequest,
            RecordContent::TreasuryTransaction(_) => RecordKind::TreasuryTransaction,
            RecordContent::SwapExecutionResult(_) => RecordKind::SwapExecutionResult,
            RecordContent::SwapCompleted(_) => RecordKind::SwapCompleted,
            RecordContent::SwapFailed(_) => RecordKind::SwapFailed,
            RecordContent::Lock(_) => RecordKind::Lock,
            RecordContent::PendingTransaction(_) => RecordKind::PendingTransaction,
            RecordContent::Position(_) => RecordKind::Position,
            RecordContent::PositionUpdate(_) => RecordKind::PositionUpdate,
            RecordContent::PositionStatus(_) => RecordKind::PositionStatus,
            RecordContent::Deposit(_) => RecordKind::Deposit,
            RecordContent::Transfer(_) => RecordKind::Transfer,
            RecordContent::StrategyExecutionRequest(_) => RecordKind::StrategyExecutionRequest,
        }
    }

    /// Decode raw content coming from an external store
    pub fn decode(value: serde_json::Value) -> Result<Self, LedgerError> {
        serde_json::from_value(value).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<serde_json::Value, LedgerError> {
        serde_json::to_value(self).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

/// A record as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: RecordId,
    pub content: RecordContent,
    pub version: u64,
    pub correlation_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn kind(&self) -> RecordKind {
        self.content.kind()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// A record about to be written; the id is assigned up front so staged writes can reference it
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub id: RecordId,
    pub content: RecordContent,
    pub correlation_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewRecord {
    pub fn new(content: RecordContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            correlation_id: None,
            expires_at: None,
        }
    }

    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub kind: Option<RecordKind>,
    pub correlation_id: Option<String>,
    pub include_expired: bool,
}

impl RecordFilter {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn correlated(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn matches(&self, record: &LedgerRecord, now: DateTime<Utc>) -> bool {
        if let Some(kind) = self.kind {
            if record.kind() != kind {
                return false;
            }
        }
        if let Some(correlation_id) = &self.correlation_id {
            if record.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                return false;
            }
        }
        self.include_expired || !record.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_dispatches_on_type_tag() {
        let raw = serde_json::json!({
            "type": "lock",
            "data": { "key": "swap-1", "holder": "agent" }
        });
        let content = RecordContent::decode(raw).unwrap();
        assert_eq!(content.kind(), RecordKind::Lock);
        assert_eq!(
            content,
            RecordContent::Lock(LockRecord { key: "swap-1".into(), holder: "agent".into() })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let raw = serde_json::json!({ "type": "embedding", "data": {} });
        assert!(matches!(RecordContent::decode(raw), Err(LedgerError::Decode(_))));
    }

    #[test]
    fn test_filter_skips_expired_records_by_default() {
        let now = Utc::now();
        let record = LedgerRecord {
            id: Uuid::new_v4(),
            content: RecordContent::Lock(LockRecord { key: "k".into(), holder: "h".into() }),
            version: 1,
            correlation_id: Some("k".into()),
            expires_at: Some(now - chrono::Duration::seconds(1)),
            created_at: now,
            updated_at: now,
        };
        assert!(!RecordFilter::kind(RecordKind::Lock).matches(&record, now));
        let filter = RecordFilter { include_expired: true, ..RecordFilter::kind(RecordKind::Lock) };
        assert!(filter.matches(&record, now));
        assert!(!filter.clone().correlated("other").matches(&record, now));
    }
}
