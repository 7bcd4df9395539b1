//! Transaction request FIFO persistence.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::infrastructure::database::entities::request_fifo;

#[derive(Clone)]
pub struct RequestFifoRepository {
    db: DatabaseConnection,
}

impl RequestFifoRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist a queue entry. Returns only after the row is committed.
    pub async fn insert(&self, id: i64, action: &str, request: &str) -> Result<(), sea_orm::DbErr> {
        let row = request_fifo::ActiveModel {
            id: Set(id),
            action: Set(action.to_string()),
            request: Set(request.to_string()),
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), sea_orm::DbErr> {
        request_fifo::Entity::delete_many()
            .filter(request_fifo::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// All persisted entries in delivery order.
    pub async fn load_all(&self) -> Result<Vec<request_fifo::Model>, sea_orm::DbErr> {
        request_fifo::Entity::find()
            .order_by_asc(request_fifo::Column::Id)
            .all(&self.db)
            .await
    }
}
