//! Installed charging profile persistence.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

use crate::infrastructure::database::entities::charging_profile;

/// Persisted form of an installed profile.
pub struct ProfileRecord {
    pub profile_id: i32,
    pub connector_id: i32,
    pub stack_level: i32,
    pub purpose: String,
    pub kind: String,
    pub recurrency_kind: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub transaction_id: Option<i32>,
    pub schedule_json: String,
}

#[derive(Clone)]
pub struct ChargingProfileRepository {
    db: DatabaseConnection,
}

impl ChargingProfileRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist an installed profile, replacing any previous row with the
    /// same profile id.
    pub async fn save(&self, record: ProfileRecord) -> Result<(), sea_orm::DbErr> {
        charging_profile::Entity::delete_many()
            .filter(charging_profile::Column::ProfileId.eq(record.profile_id))
            .exec(&self.db)
            .await?;

        let row = charging_profile::ActiveModel {
            id: Default::default(),
            profile_id: Set(record.profile_id),
            connector_id: Set(record.connector_id),
            stack_level: Set(record.stack_level),
            purpose: Set(record.purpose),
            kind: Set(record.kind),
            recurrency_kind: Set(record.recurrency_kind),
            valid_from: Set(record.valid_from),
            valid_to: Set(record.valid_to),
            transaction_id: Set(record.transaction_id),
            schedule_json: Set(record.schedule_json),
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    pub async fn delete_by_profile_ids(&self, profile_ids: &[i32]) -> Result<u64, sea_orm::DbErr> {
        if profile_ids.is_empty() {
            return Ok(0);
        }
        let result = charging_profile::Entity::delete_many()
            .filter(charging_profile::Column::ProfileId.is_in(profile_ids.iter().copied()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Bind a persisted TxProfile to its transaction once the id is known.
    pub async fn set_transaction_id(
        &self,
        profile_id: i32,
        transaction_id: i32,
    ) -> Result<(), sea_orm::DbErr> {
        if let Some(existing) = charging_profile::Entity::find()
            .filter(charging_profile::Column::ProfileId.eq(profile_id))
            .one(&self.db)
            .await?
        {
            let mut row: charging_profile::ActiveModel = existing.into();
            row.transaction_id = Set(Some(transaction_id));
            row.update(&self.db).await?;
        }
        Ok(())
    }

    pub async fn load_all(&self) -> Result<Vec<charging_profile::Model>, sea_orm::DbErr> {
        charging_profile::Entity::find().all(&self.db).await
    }
}
