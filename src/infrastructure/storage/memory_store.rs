//! In-process record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::ledger::{
    LedgerRecord, NewRecord, RecordContent, RecordFilter, RecordId, RecordStore, StagedWrite,
};
use crate::shared::errors::LedgerError;

#[derive(Default)]
struct StoreState {
    records: HashMap<RecordId, LedgerRecord>,
    /// Insertion order, so queries come back oldest first
    order: Vec<RecordId>,
    /// Live owner of each exclusive key
    exclusive: HashMap<String, RecordId>,
    /// Last version handed to an exclusive record; never reused, so a later owner
    /// of any key always carries a higher version than an earlier one
    exclusive_version: u64,
}

impl StoreState {
    fn insert(&mut self, record: NewRecord, version: u64) -> Result<LedgerRecord, LedgerError> {
        if self.records.contains_key(&record.id) {
            return Err(LedgerError::Storage(format!("duplicate record id {}", record.id)));
        }
        let now = Utc::now();
        let stored = LedgerRecord {
            id: record.id,
            content: record.content,
            version,
            correlation_id: record.correlation_id,
            expires_at: record.expires_at,
            created_at: now,
            updated_at: now,
        };
        self.order.push(stored.id);
        self.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn remove(&mut self, id: &RecordId) {
        if self.records.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
        }
    }

    fn check_version(&self, id: &RecordId, expected: u64) -> Result<(), LedgerError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        if record.version != expected {
            return Err(LedgerError::VersionConflict {
                id: id.to_string(),
                expected,
                found: record.version,
            });
        }
        Ok(())
    }

    /// Drop exclusive keys whose owner expired or is gone, with the expired records
    fn prune_exclusive(&mut self, now: DateTime<Utc>) {
        let stale: Vec<(String, RecordId)> = self
            .exclusive
            .iter()
            .filter(|(_, id)| {
                self.records
                    .get(*id)
                    .map(|record| record.is_expired(now))
                    .unwrap_or(true)
            })
            .map(|(key, id)| (key.clone(), *id))
            .collect();
        for (key, id) in stale {
            self.exclusive.remove(&key);
            self.remove(&id);
        }
    }

    fn replace(&mut self, id: &RecordId, patch: RecordContent) -> Option<LedgerRecord> {
        let record = self.records.get_mut(id)?;
        record.content = patch;
        record.version += 1;
        record.updated_at = Utc::now();
        Some(record.clone())
    }
}

/// Record store kept in memory behind a single async RwLock
#[derive(Default)]
pub struct MemoryRecordStore {
    state: RwLock<StoreState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[cfg(test)]
    async fn exclusive_keys(&self) -> usize {
        self.state.read().await.exclusive.len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: NewRecord) -> Result<LedgerRecord, LedgerError> {
        let mut state = self.state.write().await;
        state.insert(record, 1)
    }

    async fn create_exclusive(
        &self,
        key: &str,
        record: NewRecord,
    ) -> Result<Option<LedgerRecord>, LedgerError> {
        let mut state = self.state.write().await;
        state.prune_exclusive(Utc::now());
        if state.exclusive.contains_key(key) {
            return Ok(None);
        }

        let version = state.exclusive_version + 1;
        let stored = state.insert(record, version)?;
        state.exclusive_version = version;
        state.exclusive.insert(key.to_string(), stored.id);
        Ok(Some(stored))
    }

    async fn remove_exclusive(&self, key: &str, id: RecordId) -> Result<bool, LedgerError> {
        let mut state = self.state.write().await;
        if state.exclusive.get(key) != Some(&id) {
            return Ok(false);
        }
        state.exclusive.remove(key);
        state.remove(&id);
        Ok(true)
    }

    async fn get(&self, id: RecordId) -> Result<Option<LedgerRecord>, LedgerError> {
        Ok(self.state.read().await.records.get(&id).cloned())
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<LedgerRecord>, LedgerError> {
        let now = Utc::now();
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|record| filter.matches(record, now))
            .cloned()
            .collect())
    }

    async fn update_with_version(
        &self,
        id: RecordId,
        patch: RecordContent,
        expected_version: u64,
    ) -> Result<bool, LedgerError> {
        let mut state = self.state.write().await;
        match state.check_version(&id, expected_version) {
            Ok(()) => Ok(state.replace(&id, patch).is_some()),
            Err(LedgerError::VersionConflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, batch: Vec<StagedWrite>) -> Result<Vec<LedgerRecord>, LedgerError> {
        let mut state = self.state.write().await;

        for write in &batch {
            match write {
                StagedWrite::Update { id, expected_version, .. } => {
                    state.check_version(id, *expected_version)?
                }
                StagedWrite::Create(record) => {
                    if state.records.contains_key(&record.id) {
                        return Err(LedgerError::Storage(format!(
                            "duplicate record id {}",
                            record.id
                        )));
                    }
                }
            }
        }

        let mut written = Vec::with_capacity(batch.len());
        for write in batch {
            match write {
                StagedWrite::Create(record) => written.push(state.insert(record, 1)?),
                StagedWrite::Update { id, patch, .. } => {
                    if let Some(updated) = state.replace(&id, patch) {
                        written.push(updated);
                    }
                }
            }
        }
        Ok(written)
    }
}
