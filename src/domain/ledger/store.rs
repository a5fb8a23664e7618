//! Record store contract the ledger is built on

use async_trait::async_trait;

use super::record::{LedgerRecord, NewRecord, RecordContent, RecordFilter, RecordId};
use crate::shared::errors::LedgerError;

/// A write staged inside a ledger transaction
#[derive(Debug, Clone, PartialEq)]
pub enum StagedWrite {
    Create(NewRecord),
    Update {
        id: RecordId,
        patch: RecordContent,
        expected_version: u64,
    },
}

/// Append-only record store with optimistic versioning
///
/// Implementations must make `create_exclusive`, `update_with_version` and `apply`
/// atomic with respect to each other.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: NewRecord) -> Result<LedgerRecord, LedgerError>;

    /// Create a record that owns `key`, unless a live (unexpired) record already does.
    /// An expired owner is superseded. The created record's version is one above the
    /// previous owner's, so versions per key only ever grow.
    async fn create_exclusive(
        &self,
        key: &str,
        record: NewRecord,
    ) -> Result<Option<LedgerRecord>, LedgerError>;

    /// Drop ownership of `key` if `id` still holds it. Returns false when it no longer did.
    async fn remove_exclusive(&self, key: &str, id: RecordId) -> Result<bool, LedgerError>;

    async fn get(&self, id: RecordId) -> Result<Option<LedgerRecord>, LedgerError>;

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<LedgerRecord>, LedgerError>;

    /// Replace the record's content only if its version still equals `expected_version`
    async fn update_with_version(
        &self,
        id: RecordId,
        patch: RecordContent,
        expected_version: u64,
    ) -> Result<bool, LedgerError>;

    /// Apply a batch all-or-nothing; any version mismatch rejects the whole batch
    async fn apply(&self, batch: Vec<StagedWrite>) -> Result<Vec<LedgerRecord>, LedgerError>;
}
