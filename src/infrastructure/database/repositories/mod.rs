//! Repository layer: one struct per persisted table.
//!
//! Callers receive plain values, never cursors; every statement is owned by
//! the repository that issues it.

pub mod auth_cache_repository;
pub mod auth_local_list_repository;
pub mod charging_profile_repository;
pub mod internal_config_repository;
pub mod request_fifo_repository;

pub use auth_cache_repository::AuthCacheRepository;
pub use auth_local_list_repository::AuthLocalListRepository;
pub use charging_profile_repository::ChargingProfileRepository;
pub use internal_config_repository::InternalConfigRepository;
pub use request_fifo_repository::RequestFifoRepository;
