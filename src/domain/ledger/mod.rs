//! Ledger domain - append-only records, transactions and optimistic updates

pub mod record;
pub mod store;
pub mod transaction;

pub use record::{
    DepositContent, LedgerRecord, LockRecord, NewRecord, PositionStatusChange, PositionUpdate,
    RecordContent, RecordFilter, RecordId, RecordKind, StrategyExecutionRequest, SwapCompleted,
    SwapExecutionResult, SwapFailed, TransferContent,
};
pub use store::{RecordStore, StagedWrite};
pub use transaction::{LedgerTransaction, TransactionalLedger};
