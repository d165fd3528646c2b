use super::db_data::user;
use async_trait::async_trait;
use domain::user::{User, UserError, UserRepository, UserRole};
use domain::value::UserId;
use sea_orm::*;

#[derive(Clone)]
pub struct UserRepositoryImpl {
    db: DatabaseConnection,
}

impl UserRepositoryImpl {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl TryFrom<user::Model> for User {
    type Error = UserError;
    fn try_from(model: user::Model) -> Result<Self, Self::Error> {
        let role = UserRole::try_from(model.role.as_str()).map_err(UserError::OtherErr)?;
        Ok(User {
            id: UserId::from(model.id),
            username: model.username,
            role,
        })
    }
}

#[async_trait]
impl UserRepository for UserRepositoryImpl {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserError> {
        let result = user::Entity::find_by_id(id.as_i64())
            .one(&self.db)
            .await
            .map_err(|e| UserError::DbErr(e.to_string()))?;
        result.map(User::try_from).transpose()
    }
}
