//! Lock domain - time-bounded exclusive ownership of named resources

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::ledger::{
    LedgerRecord, LockRecord, NewRecord, RecordContent, RecordFilter, RecordId, RecordKind,
    RecordStore,
};
use crate::shared::errors::LedgerError;

#[derive(Debug, Clone, PartialEq)]
pub struct DistributedLock {
    pub lock_id: RecordId,
    pub key: String,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
}

impl DistributedLock {
    fn from_record(record: &LedgerRecord) -> Option<Self> {
        match &record.content {
            RecordContent::Lock(lock) => Some(Self {
                lock_id: record.id,
                key: lock.key.clone(),
                holder: lock.holder.clone(),
                expires_at: record.expires_at?,
                version: record.version,
            }),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Grants locks backed by exclusive records in the shared store, so every process
/// using the same store observes the same owner.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn RecordStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Try to take `key`. Contention is `Ok(None)`, never an error.
    pub async fn acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<LockGuard>, LedgerError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LedgerError::Storage(format!("invalid lock ttl: {}", e)))?;
        let record = NewRecord::new(RecordContent::Lock(LockRecord {
            key: key.to_string(),
            holder: holder.to_string(),
        }))
        .correlated(key)
        .expiring_at(Utc::now() + ttl);

        let Some(stored) = self.store.create_exclusive(key, record).await? else {
            debug!(key, holder, "lock busy");
            return Ok(None);
        };
        let lock = DistributedLock::from_record(&stored)
            .ok_or_else(|| LedgerError::Decode(format!("record {} is not a lock", stored.id)))?;
        info!(key, holder, version = lock.version, "🔒 lock acquired");
        Ok(Some(LockGuard {
            manager: self.clone(),
            lock,
            released: false,
        }))
    }

    /// Release `lock`. Releasing twice, or after someone superseded it, is a no-op.
    pub async fn release(&self, lock: &DistributedLock) -> Result<(), LedgerError> {
        if self.store.remove_exclusive(&lock.key, lock.lock_id).await? {
            info!(key = %lock.key, holder = %lock.holder, "🔓 lock released");
        } else {
            debug!(key = %lock.key, "lock already released or superseded");
        }
        Ok(())
    }

    /// Live owner of `key`, if any
    pub async fn current(&self, key: &str) -> Result<Option<DistributedLock>, LedgerError> {
        let records = self
            .store
            .query(&RecordFilter::kind(RecordKind::Lock).correlated(key))
            .await?;
        Ok(records.iter().rev().find_map(DistributedLock::from_record))
    }
}

/// Held lock. Call [`LockGuard::release`] on every path; if the guard is dropped
/// unreleased (panic, cancelled future) release is scheduled on the runtime.
pub struct LockGuard {
    manager: LockManager,
    lock: DistributedLock,
    released: bool,
}

impl LockGuard {
    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    pub async fn release(mut self) -> Result<(), LedgerError> {
        self.released = true;
        self.manager.release(&self.lock).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let manager = self.manager.clone();
        let lock = self.lock.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = manager.release(&lock).await {
                        warn!(key = %lock.key, error = %e, "deferred lock release failed");
                    }
                });
            }
            Err(_) => warn!(key = %self.lock.key, "lock dropped outside runtime, relying on expiry"),
        }
    }
}
