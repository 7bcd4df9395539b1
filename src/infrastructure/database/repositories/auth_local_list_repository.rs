//! Local authorization list persistence.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};

use crate::infrastructure::database::entities::auth_local_list;

/// One entry of a full-list replacement.
pub struct ListEntry {
    pub tag: String,
    pub parent: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub status: String,
}

#[derive(Clone)]
pub struct AuthLocalListRepository {
    db: DatabaseConnection,
}

impl AuthLocalListRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, tag: &str) -> Result<Option<auth_local_list::Model>, sea_orm::DbErr> {
        auth_local_list::Entity::find()
            .filter(auth_local_list::Column::Tag.eq(tag))
            .one(&self.db)
            .await
    }

    /// Atomically clear the list and insert the supplied entries.
    pub async fn replace_all(&self, entries: Vec<ListEntry>) -> Result<(), sea_orm::DbErr> {
        let txn = self.db.begin().await?;
        auth_local_list::Entity::delete_many().exec(&txn).await?;
        for entry in entries {
            let row = auth_local_list::ActiveModel {
                id: Default::default(),
                tag: Set(entry.tag),
                parent: Set(entry.parent),
                expiry: Set(entry.expiry),
                status: Set(entry.status),
            };
            row.insert(&txn).await?;
        }
        txn.commit().await
    }

    pub async fn upsert(
        &self,
        tag: &str,
        parent: Option<String>,
        expiry: Option<DateTime<Utc>>,
        status: &str,
    ) -> Result<(), sea_orm::DbErr> {
        match self.find(tag).await? {
            Some(existing) => {
                let mut row: auth_local_list::ActiveModel = existing.into();
                row.parent = Set(parent);
                row.expiry = Set(expiry);
                row.status = Set(status.to_string());
                row.update(&self.db).await?;
            }
            None => {
                let row = auth_local_list::ActiveModel {
                    id: Default::default(),
                    tag: Set(tag.to_string()),
                    parent: Set(parent),
                    expiry: Set(expiry),
                    status: Set(status.to_string()),
                };
                row.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_by_tag(&self, tag: &str) -> Result<u64, sea_orm::DbErr> {
        let result = auth_local_list::Entity::delete_many()
            .filter(auth_local_list::Column::Tag.eq(tag))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn count(&self) -> Result<u64, sea_orm::DbErr> {
        auth_local_list::Entity::find().count(&self.db).await
    }
}
