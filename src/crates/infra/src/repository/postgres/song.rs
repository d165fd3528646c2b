use super::db_data::song;
use async_trait::async_trait;
use domain::song::{Song, SongError, SongRepository};
use domain::value::SongId;
use sea_orm::*;

#[derive(Clone)]
pub struct SongRepositoryImpl {
    db: DatabaseConnection,
}

impl SongRepositoryImpl {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl From<song::Model> for Song {
    fn from(model: song::Model) -> Self {
        Song {
            id: SongId::from(model.id),
            title: model.title,
            artist: model.artist,
            object_key: model.object_key,
            duration_secs: model.duration,
        }
    }
}

#[async_trait]
impl SongRepository for SongRepositoryImpl {
    async fn find_by_id(&self, id: SongId) -> Result<Option<Song>, SongError> {
        let result = song::Entity::find_by_id(id.as_i64())
            .one(&self.db)
            .await
            .map_err(|e| SongError::DbErr(e.to_string()))?;
        Ok(result.map(|model| model.into()))
    }
}
