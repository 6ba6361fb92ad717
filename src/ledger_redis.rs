#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use redis::AsyncCommands;

#[cfg(feature = "redis")]
use crate::error::LedgerError;
#[cfg(feature = "redis")]
use crate::ledger::CommitLedger;
#[cfg(feature = "redis")]
use crate::types::{CommitKey, CommitRecord};

/// Ledger stored in a single Redis hash, `<prefix>:commits`.
///
/// Fields are `"<source>|<sequence>"`, values the JSON record.
#[cfg(feature = "redis")]
pub struct RedisLedger {
    client: redis::Client,
    prefix: String,
}

#[cfg(feature = "redis")]
impl RedisLedger {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn commits_key(&self) -> String {
        format!("{}:commits", self.prefix)
    }

    fn field(key: &CommitKey) -> String {
        format!("{}|{}", key.source_id.0, key.sequence)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, LedgerError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl CommitLedger for RedisLedger {
    async fn commit(&self, record: CommitRecord) -> Result<bool, LedgerError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&record)
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        conn.hset_nx(self.commits_key(), Self::field(&record.key), payload)
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))
    }

    async fn get(&self, key: &CommitKey) -> Result<Option<CommitRecord>, LedgerError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .hget(self.commits_key(), Self::field(key))
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;
        payload
            .map(|p| serde_json::from_str::<CommitRecord>(&p).map_err(|e| LedgerError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn exists(&self, key: &CommitKey) -> Result<bool, LedgerError> {
        let mut conn = self.connection().await?;
        conn.hexists(self.commits_key(), Self::field(key))
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))
    }
}
