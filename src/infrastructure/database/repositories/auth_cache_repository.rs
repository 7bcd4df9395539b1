//! Authorization cache persistence.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use tracing::debug;

use crate::infrastructure::database::entities::auth_cache;

#[derive(Clone)]
pub struct AuthCacheRepository {
    db: DatabaseConnection,
}

impl AuthCacheRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// (Re)install the FIFO-eviction trigger: once an insert pushes the row
    /// count above `max_entries`, the oldest row (smallest id) is deleted.
    pub async fn install_eviction_trigger(&self, max_entries: u32) -> Result<(), sea_orm::DbErr> {
        self.db
            .execute_unprepared("DROP TRIGGER IF EXISTS auth_cache_evict_oldest;")
            .await?;
        let sql = format!(
            "CREATE TRIGGER auth_cache_evict_oldest AFTER INSERT ON auth_cache \
             WHEN ((SELECT COUNT(*) FROM auth_cache) > {}) \
             BEGIN DELETE FROM auth_cache WHERE id IN \
             (SELECT id FROM auth_cache ORDER BY id ASC LIMIT 1); END;",
            max_entries
        );
        self.db.execute_unprepared(&sql).await?;
        Ok(())
    }

    pub async fn find(&self, tag: &str) -> Result<Option<auth_cache::Model>, sea_orm::DbErr> {
        auth_cache::Entity::find()
            .filter(auth_cache::Column::Tag.eq(tag))
            .one(&self.db)
            .await
    }

    /// Insert or update the row for `tag`.
    pub async fn upsert(
        &self,
        tag: &str,
        parent: Option<String>,
        expiry: Option<DateTime<Utc>>,
        status: &str,
    ) -> Result<(), sea_orm::DbErr> {
        match self.find(tag).await? {
            Some(existing) => {
                let mut row: auth_cache::ActiveModel = existing.into();
                row.parent = Set(parent);
                row.expiry = Set(expiry);
                row.status = Set(status.to_string());
                row.update(&self.db).await?;
                debug!(tag, "Cache entry updated");
            }
            None => {
                let row = auth_cache::ActiveModel {
                    id: Default::default(),
                    tag: Set(tag.to_string()),
                    parent: Set(parent),
                    expiry: Set(expiry),
                    status: Set(status.to_string()),
                };
                row.insert(&self.db).await?;
                debug!(tag, "Cache entry inserted");
            }
        }
        Ok(())
    }

    pub async fn delete_by_tag(&self, tag: &str) -> Result<u64, sea_orm::DbErr> {
        let result = auth_cache::Entity::delete_many()
            .filter(auth_cache::Column::Tag.eq(tag))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn clear(&self) -> Result<u64, sea_orm::DbErr> {
        let result = auth_cache::Entity::delete_many().exec(&self.db).await?;
        Ok(result.rows_affected)
    }

    pub async fn count(&self) -> Result<u64, sea_orm::DbErr> {
        auth_cache::Entity::find().count(&self.db).await
    }
}
