#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use tokio_postgres::Client;

#[cfg(feature = "postgres")]
use crate::error::LedgerError;
#[cfg(feature = "postgres")]
use crate::ledger::CommitLedger;
#[cfg(feature = "postgres")]
use crate::types::{CommitKey, CommitKind, CommitRecord};

/// Ledger stored in the `webhook_commits` table.
#[cfg(feature = "postgres")]
pub struct PostgresLedger {
    client: Client,
}

#[cfg(feature = "postgres")]
impl PostgresLedger {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_commits (
                    source_id TEXT NOT NULL,
                    sequence BIGINT NOT NULL,
                    delivered_at_ms BIGINT NOT NULL,
                    kind TEXT NOT NULL,
                    PRIMARY KEY (source_id, sequence)
                )",
                &[],
            )
            .await?;

        Ok(Self { client })
    }

    fn sequence(key: &CommitKey) -> Result<i64, LedgerError> {
        i64::try_from(key.sequence).map_err(|_| LedgerError::SequenceOutOfRange(key.sequence))
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl CommitLedger for PostgresLedger {
    async fn commit(&self, record: CommitRecord) -> Result<bool, LedgerError> {
        let sequence = Self::sequence(&record.key)?;
        let delivered_at = i64::try_from(record.delivered_at).unwrap_or(i64::MAX);
        let inserted = self.client.execute(
            "INSERT INTO webhook_commits (source_id, sequence, delivered_at_ms, kind)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (source_id, sequence) DO NOTHING",
            &[&record.key.source_id.0, &sequence, &delivered_at, &record.kind.as_str()],
        )
        .await
        .map_err(|e| LedgerError::Backend(e.to_string()))?;

        Ok(inserted == 1)
    }

    async fn get(&self, key: &CommitKey) -> Result<Option<CommitRecord>, LedgerError> {
        let sequence = Self::sequence(key)?;
        let row = self.client
            .query_opt(
                "SELECT delivered_at_ms, kind FROM webhook_commits
                 WHERE source_id = $1 AND sequence = $2",
                &[&key.source_id.0, &sequence],
            )
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let delivered_at: i64 = row.try_get(0).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        let kind: String = row.try_get(1).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        let kind = CommitKind::parse(&kind).ok_or_else(|| LedgerError::Corrupt(kind.clone()))?;

        Ok(Some(CommitRecord {
            key: key.clone(),
            delivered_at: delivered_at.max(0) as u64,
            kind,
        }))
    }
}
