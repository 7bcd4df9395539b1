//! Local authorization list entity.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "auth_local_list")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub tag: String,

    #[sea_orm(nullable)]
    pub parent: Option<String>,

    #[sea_orm(nullable)]
    pub expiry: Option<DateTimeUtc>,

    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
