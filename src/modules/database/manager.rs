use crate::modules::context::Initialize;
use crate::modules::error::RollupResult;
use native_db::Database;
use std::sync::{Arc, LazyLock};
#[cfg(not(test))]
use crate::modules::database::KPI_MODELS;
#[cfg(not(test))]
use crate::modules::error::{code::ErrorCode, RollupError};
#[cfg(not(test))]
use crate::modules::settings::{cli::SETTINGS, dir::DATA_DIR_MANAGER};
#[cfg(not(test))]
use crate::raise_error;
#[cfg(not(test))]
use native_db::Builder;
#[cfg(not(test))]
use tracing::info;

#[cfg(not(test))]
const DEFAULT_CACHE_SIZE: usize = 134217728;
#[cfg(not(test))]
const MIN_CACHE_SIZE: usize = 67108864;

pub static DB_MANAGER: LazyLock<DatabaseManager> = LazyLock::new(DatabaseManager::new);

pub struct DatabaseManager {
    /// Aggregates, processor marker, visit events and ingest offsets
    kpi_db: Arc<Database<'static>>,
}

impl DatabaseManager {
    fn new() -> Self {
        let kpi_db = Self::init_kpi_database().expect("Failed to initialize kpi database");
        DatabaseManager { kpi_db }
    }

    pub fn kpi_db(&self) -> &Arc<Database<'static>> {
        &self.kpi_db
    }

    #[cfg(test)]
    fn init_kpi_database() -> RollupResult<Arc<Database<'static>>> {
        Ok(crate::modules::database::in_memory_database())
    }

    #[cfg(not(test))]
    fn init_kpi_database() -> RollupResult<Arc<Database<'static>>> {
        info!("Initializing kpi database at: {:?}", &DATA_DIR_MANAGER.kpi_db);
        let mut database = Builder::new()
            .set_cache_size(
                SETTINGS
                    .rollup_db_cache_size
                    .unwrap_or(DEFAULT_CACHE_SIZE)
                    .max(MIN_CACHE_SIZE),
            ) //default 128MB
            .create(&KPI_MODELS, DATA_DIR_MANAGER.kpi_db.clone())
            .map_err(Self::handle_database_error)?;
        database
            .compact()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
        Ok(Arc::new(database))
    }

    #[cfg(not(test))]
    fn handle_database_error(error: native_db::db_type::Error) -> RollupError {
        match error {
            native_db::db_type::Error::RedbDatabaseError(database_error) => match database_error {
                redb::DatabaseError::DatabaseAlreadyOpen => {
                    raise_error!(
                        "Database is already open by another instance".into(),
                        ErrorCode::StorageError
                    )
                }
                other => {
                    raise_error!(
                        format!("Database error: {:?}", other),
                        ErrorCode::StorageError
                    )
                }
            },
            other => {
                raise_error!(
                    format!("Failed to create database: {:?}", other),
                    ErrorCode::StorageError
                )
            }
        }
    }
}

impl Initialize for DatabaseManager {
    async fn initialize() -> RollupResult<()> {
        // Opening happens lazily; force it here so a locked or corrupt file fails startup.
        let _ = DB_MANAGER.kpi_db();
        Ok(())
    }
}
