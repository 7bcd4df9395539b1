//! Transaction request FIFO entity.
//!
//! `id` is assigned by the in-memory FIFO, not auto-incremented: restore
//! order is `ORDER BY id ASC` and the counter is re-seeded from `max(id)+1`
//! at load.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_fifo")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// OCPP action name, e.g. `StartTransaction`.
    pub action: String,

    /// Request payload as a JSON document.
    #[sea_orm(column_type = "Text")]
    pub request: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
