use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::LedgerError;
use crate::types::{CommitKey, CommitRecord};

/// Durable, write-once record of committed `(source, sequence)` pairs.
///
/// `commit` is put-if-absent: a second commit for a key leaves the first
/// record in place and returns `Ok(false)`. Records are never removed.
///
/// Implementations must tolerate concurrent callers for different sources.
/// Callers for the same source are serialized upstream (one consumer per
/// partition, ordering gate), so no per-source locking is needed here.
#[async_trait]
pub trait CommitLedger: Send + Sync {
    /// Insert `record` unless its key exists. Returns whether it was inserted.
    async fn commit(&self, record: CommitRecord) -> Result<bool, LedgerError>;

    async fn get(&self, key: &CommitKey) -> Result<Option<CommitRecord>, LedgerError>;

    async fn exists(&self, key: &CommitKey) -> Result<bool, LedgerError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// In-memory ledger for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<CommitKey, CommitRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All committed keys, sorted.
    pub async fn keys(&self) -> Vec<CommitKey> {
        let guard = self.records.read().await;
        let mut keys: Vec<CommitKey> = guard.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CommitLedger for InMemoryLedger {
    async fn commit(&self, record: CommitRecord) -> Result<bool, LedgerError> {
        let mut guard = self.records.write().await;
        if guard.contains_key(&record.key) {
            return Ok(false);
        }
        guard.insert(record.key.clone(), record);
        Ok(true)
    }

    async fn get(&self, key: &CommitKey) -> Result<Option<CommitRecord>, LedgerError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn exists(&self, key: &CommitKey) -> Result<bool, LedgerError> {
        Ok(self.records.read().await.contains_key(key))
    }
}
