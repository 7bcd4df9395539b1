//! SeaORM entities, one per persisted table.

pub mod auth_cache;
pub mod auth_local_list;
pub mod charging_profile;
pub mod internal_config;
pub mod request_fifo;
