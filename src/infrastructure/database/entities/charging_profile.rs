//! Installed charging profile entity.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "charging_profiles")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Profile id from the OCPP ChargingProfile object.
    pub profile_id: i32,

    /// Connector the profile is installed on (0 = station-wide).
    pub connector_id: i32,

    pub stack_level: i32,

    /// ChargingProfilePurpose: ChargePointMaxProfile, TxDefaultProfile, TxProfile.
    pub purpose: String,

    /// ChargingProfileKind: Absolute, Recurring, Relative.
    pub kind: String,

    /// RecurrencyKind: Daily, Weekly.
    #[sea_orm(nullable)]
    pub recurrency_kind: Option<String>,

    #[sea_orm(nullable)]
    pub valid_from: Option<DateTimeUtc>,

    #[sea_orm(nullable)]
    pub valid_to: Option<DateTimeUtc>,

    /// Transaction binding for TxProfile.
    #[sea_orm(nullable)]
    pub transaction_id: Option<i32>,

    /// The full ChargingSchedule as JSON.
    #[sea_orm(column_type = "Text")]
    pub schedule_json: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
