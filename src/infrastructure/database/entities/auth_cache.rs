//! Authorization cache entity.
//!
//! Rowid order doubles as insertion order; the FIFO eviction trigger
//! installed by the cache repository relies on it.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "auth_cache")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Case-sensitive idTag, at most 20 characters.
    pub tag: String,

    #[sea_orm(nullable)]
    pub parent: Option<String>,

    #[sea_orm(nullable)]
    pub expiry: Option<DateTimeUtc>,

    /// AuthorizationStatus as its OCPP string form.
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
