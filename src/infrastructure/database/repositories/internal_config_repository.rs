//! Internal key/value store persistence.

use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

use crate::infrastructure::database::entities::internal_config;

/// Key for the persisted local authorization list version.
pub const LOCAL_LIST_VERSION_KEY: &str = "LocalListVersion";
/// Key prefix for persisted connector availability ("0" = inoperative).
pub const CONNECTOR_AVAILABILITY_KEY_PREFIX: &str = "ConnectorAvailability.";
/// Key prefix for persisted OCPP configuration overrides.
pub const OCPP_CONFIG_KEY_PREFIX: &str = "OcppConfig.";
/// Key for the last BootNotification registration status.
pub const REGISTRATION_STATUS_KEY: &str = "RegistrationStatus";

#[derive(Clone)]
pub struct InternalConfigRepository {
    db: DatabaseConnection,
}

impl InternalConfigRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, sea_orm::DbErr> {
        Ok(internal_config::Entity::find_by_id(key)
            .one(&self.db)
            .await?
            .map(|row| row.value))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), sea_orm::DbErr> {
        match internal_config::Entity::find_by_id(key).one(&self.db).await? {
            Some(existing) => {
                let mut row: internal_config::ActiveModel = existing.into();
                row.value = Set(value.to_string());
                row.update(&self.db).await?;
            }
            None => {
                let row = internal_config::ActiveModel {
                    key: Set(key.to_string()),
                    value: Set(value.to_string()),
                };
                row.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    /// All keys sharing a prefix, with the prefix stripped.
    pub async fn get_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, sea_orm::DbErr> {
        let rows = internal_config::Entity::find().all(&self.db).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                row.key
                    .strip_prefix(prefix)
                    .map(|k| (k.to_string(), row.value))
            })
            .collect())
    }
}
