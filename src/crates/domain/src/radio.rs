use crate::value::{QueueEntryId, SongId, UserId};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue entry not found: {0}")]
    EntryNotFound(String),
    #[error("{0}")]
    DbErr(String),
    #[error("{0}")]
    OtherErr(String),
}

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("url signing failed: {0}")]
    Provider(String),
}

/// Persisted queue row. Position is monotonic at insert time and is only
/// used to reconstruct order at cold start; the in-memory order is
/// authoritative while the engine runs.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub song_id: SongId,
    pub added_by: UserId,
    pub position: i32,
    pub created_at: NaiveDateTime,
}

/// Durable system-of-record for queue membership.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn append(
        &self,
        song_id: SongId,
        added_by: UserId,
        position: i32,
    ) -> Result<QueueEntry, QueueError>;
    async fn delete(&self, id: QueueEntryId) -> Result<(), QueueError>;
    async fn list_ordered(&self) -> Result<Vec<QueueEntry>, QueueError>;
    async fn max_position(&self) -> Result<Option<i32>, QueueError>;
}

/// Produces a time-limited playable URL for an opaque object key.
#[async_trait]
pub trait SignedUrlProvider: Send + Sync {
    async fn signed_url(&self, object_key: &str) -> Result<String, SignerError>;
}
