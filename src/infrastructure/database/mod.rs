//! SQLite persistence.
//!
//! All station state that must survive restarts lives here: the
//! authorization cache and local list, the transaction request FIFO, the
//! installed charging profiles and the internal key/value store.

pub mod entities;
pub mod migrator;
pub mod repositories;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

pub use repositories::{
    AuthCacheRepository, AuthLocalListRepository, ChargingProfileRepository,
    InternalConfigRepository, RequestFifoRepository,
};

/// Open the database and bring the schema up to date.
pub async fn init_database(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(url.to_string());
    // A single connection keeps the in-memory database alive across
    // statements and serializes writes the way SQLite expects.
    options.max_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await?;
    migrator::Migrator::up(&db, None).await?;
    info!(url, "Database ready");
    Ok(db)
}

/// Bundle of all repositories sharing one connection.
#[derive(Clone)]
pub struct Repositories {
    pub auth_cache: AuthCacheRepository,
    pub auth_local_list: AuthLocalListRepository,
    pub request_fifo: RequestFifoRepository,
    pub charging_profiles: ChargingProfileRepository,
    pub internal_config: InternalConfigRepository,
}

impl Repositories {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            auth_cache: AuthCacheRepository::new(db.clone()),
            auth_local_list: AuthLocalListRepository::new(db.clone()),
            request_fifo: RequestFifoRepository::new(db.clone()),
            charging_profiles: ChargingProfileRepository::new(db.clone()),
            internal_config: InternalConfigRepository::new(db),
        }
    }
}
