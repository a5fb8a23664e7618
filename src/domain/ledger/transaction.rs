//! Transactional wrapper over the record store

use std::sync::Arc;
use tracing::debug;

use super::record::{LedgerRecord, NewRecord, RecordContent, RecordFilter, RecordId};
use super::store::{RecordStore, StagedWrite};
use crate::shared::errors::LedgerError;

/// Entry point for all bookkeeping writes
#[derive(Clone)]
pub struct TransactionalLedger {
    store: Arc<dyn RecordStore>,
}

impl TransactionalLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Open a unit of work
    pub fn begin(&self) -> LedgerTransaction {
        LedgerTransaction {
            store: Arc::clone(&self.store),
            depth: 1,
            staged: Vec::new(),
            finished: false,
        }
    }

    /// Write outside any transaction
    pub async fn create(&self, record: NewRecord) -> Result<LedgerRecord, LedgerError> {
        self.store.create(record).await
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<LedgerRecord>, LedgerError> {
        self.store.get(id).await
    }

    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.store.query(filter).await
    }

    pub async fn update_with_version(
        &self,
        id: RecordId,
        patch: RecordContent,
        expected_version: u64,
    ) -> Result<bool, LedgerError> {
        self.store.update_with_version(id, patch, expected_version).await
    }
}

/// Staged writes that become visible together on the outermost commit.
///
/// Nested `begin` calls only bump the depth; inner `commit`/`rollback` calls unwind it
/// without touching the store. Dropping an unfinished transaction discards its writes.
pub struct LedgerTransaction {
    store: Arc<dyn RecordStore>,
    depth: u32,
    staged: Vec<StagedWrite>,
    finished: bool,
}

impl LedgerTransaction {
    pub fn begin(&mut self) {
        self.depth += 1;
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn create(&mut self, record: NewRecord) -> Result<RecordId, LedgerError> {
        self.ensure_open()?;
        let id = record.id;
        self.staged.push(StagedWrite::Create(record));
        Ok(id)
    }

    pub fn update(
        &mut self,
        id: RecordId,
        patch: RecordContent,
        expected_version: u64,
    ) -> Result<(), LedgerError> {
        self.ensure_open()?;
        self.staged.push(StagedWrite::Update { id, patch, expected_version });
        Ok(())
    }

    /// Returns the written records when this was the outermost commit, `None` otherwise
    pub async fn commit(&mut self) -> Result<Option<Vec<LedgerRecord>>, LedgerError> {
        self.ensure_open()?;
        if self.depth > 1 {
            self.depth -= 1;
            return Ok(None);
        }
        self.depth = 0;
        self.finished = true;
        let batch = std::mem::take(&mut self.staged);
        debug!(writes = batch.len(), "committing ledger transaction");
        self.store.apply(batch).await.map(Some)
    }

    /// Returns true when this was the outermost rollback and staged writes were discarded
    pub fn rollback(&mut self) -> bool {
        if self.finished {
            return false;
        }
        if self.depth > 1 {
            self.depth -= 1;
            return false;
        }
        self.depth = 0;
        self.finished = true;
        let discarded = std::mem::take(&mut self.staged);
        debug!(writes = discarded.len(), "rolled back ledger transaction");
        true
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.finished {
            Err(LedgerError::TransactionFinished)
        } else {
            Ok(())
        }
    }
}
