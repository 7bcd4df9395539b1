//! External concerns: the SQLite persistence layer.

pub mod database;

pub use database::{init_database, Repositories};
