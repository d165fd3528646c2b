use crate::value::SongId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SongError {
    #[error("song not found: {0}")]
    SongNotFound(String),
    #[error("{0}")]
    DbErr(String),
    #[error("{0}")]
    OtherErr(String),
}

/// Catalog view of a song: just enough to project a playable queue track.
#[derive(Debug, Clone)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    /// Opaque storage key handed to the signed-URL provider
    pub object_key: String,
    pub duration_secs: i64,
}

#[async_trait]
pub trait SongRepository: Send + Sync {
    async fn find_by_id(&self, id: SongId) -> Result<Option<Song>, SongError>;
}
