use super::db_data::queue_entry;
use async_trait::async_trait;
use chrono::Utc;
use domain::radio::{QueueEntry, QueueError, QueueRepository};
use domain::value::{QueueEntryId, SongId, UserId};
use sea_orm::*;

#[derive(Clone)]
pub struct QueueRepositoryImpl {
    db: DatabaseConnection,
}

impl QueueRepositoryImpl {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl From<queue_entry::Model> for QueueEntry {
    fn from(model: queue_entry::Model) -> Self {
        QueueEntry {
            id: QueueEntryId::from(model.id),
            song_id: SongId::from(model.song_id),
            added_by: UserId::from(model.added_by),
            position: model.position,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct MaxPositionRow {
    max_position: Option<i32>,
}

#[async_trait]
impl QueueRepository for QueueRepositoryImpl {
    async fn append(
        &self,
        song_id: SongId,
        added_by: UserId,
        position: i32,
    ) -> Result<QueueEntry, QueueError> {
        let active = queue_entry::ActiveModel {
            song_id: Set(song_id.as_i64()),
            added_by: Set(added_by.as_i64()),
            position: Set(position),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        };
        let result = queue_entry::Entity::insert(active)
            .exec(&self.db)
            .await
            .map_err(|e| QueueError::DbErr(e.to_string()))?;
        let model = queue_entry::Entity::find_by_id(result.last_insert_id)
            .one(&self.db)
            .await
            .map_err(|e| QueueError::DbErr(e.to_string()))?
            .ok_or_else(|| QueueError::EntryNotFound(result.last_insert_id.to_string()))?;
        Ok(model.into())
    }

    async fn delete(&self, id: QueueEntryId) -> Result<(), QueueError> {
        // Idempotent: deleting an already-gone row is not an error.
        queue_entry::Entity::delete_by_id(id.as_i64())
            .exec(&self.db)
            .await
            .map_err(|e| QueueError::DbErr(e.to_string()))?;
        Ok(())
    }

    async fn list_ordered(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let models = queue_entry::Entity::find()
            .order_by_asc(queue_entry::Column::Position)
            .all(&self.db)
            .await
            .map_err(|e| QueueError::DbErr(e.to_string()))?;
        Ok(models.into_iter().map(|m| m.into()).collect())
    }

    async fn max_position(&self) -> Result<Option<i32>, QueueError> {
        let row = queue_entry::Entity::find()
            .select_only()
            .column_as(queue_entry::Column::Position.max(), "max_position")
            .into_model::<MaxPositionRow>()
            .one(&self.db)
            .await
            .map_err(|e| QueueError::DbErr(e.to_string()))?;
        Ok(row.and_then(|r| r.max_position))
    }
}
