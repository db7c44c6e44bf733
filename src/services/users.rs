use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::EntityTrait;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{user, UserType},
    errors::ServiceError,
};

/// What the lifecycle engine needs to know about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub user_type: UserType,
}

impl UserRecord {
    pub fn is_courier(&self) -> bool {
        self.user_type == UserType::Courier
    }
}

impl From<user::Model> for UserRecord {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            user_type: model.user_type,
        }
    }
}

/// Read-only view of the account store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, ServiceError>;
}

/// Looks users up in the shared `users` table.
#[derive(Clone)]
pub struct DbUserDirectory {
    db: Arc<DbPool>,
}

impl DbUserDirectory {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    #[instrument(skip(self))]
    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, ServiceError> {
        let user = user::Entity::find_by_id(user_id).one(&*self.db).await?;
        Ok(user.map(UserRecord::from))
    }
}
