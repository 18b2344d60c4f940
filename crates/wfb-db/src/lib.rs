//! # wfb-db
//!
//! MySQL storage layer for the waveform event browser.
//!
//! This crate provides:
//! - UTC-pinned connection pools, schema verification and environment configuration
//! - Parameterized WHERE clause generation for event, series and series set criteria
//! - Row types and the assembler that rebuilds nested events from them
//! - Repository implementations for events, series and series sets
//! - Read-only access to raw capture files on disk
//!
//! ## Example
//!
//! ```rust,ignore
//! use wfb_db::{Database, EventFilter, EventQueryOptions, EventRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("mysql://localhost/waveforms").await?
//!         .with_data_dir("/usr/opsdata/waveforms");
//!
//!     let filter = EventFilter::new().with_system("rf").with_archive(true);
//!     for event in db.events.list(&filter, EventQueryOptions::summary()).await? {
//!         println!("{} {}", event.location(), event.event_time());
//!     }
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod capture_source;
pub mod config;
pub mod events;
pub mod filter;
pub mod pool;
pub mod rows;
pub mod series;

// Always compiled so integration tests (in tests/) can use it
pub mod test_fixtures;

// Re-export core types
pub use wfb_core::*;

pub use assembler::EventAssembler;
pub use capture_source::{parse_capture_file, DataLocation, FilesystemWaveformSource};
pub use config::DbConfig;
pub use events::MySqlEventRepository;
pub use filter::{
    bind_params, label_predicate_sql, EventFilterQueryBuilder, QueryParam, SeriesFilterQueryBuilder,
    SeriesSetFilterQueryBuilder,
};
pub use pool::{connect_options, create_pool, verify_database, PoolConfig};
pub use series::{resolve_series_selection, MySqlSeriesRepository};

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::mysql::MySqlPool;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: MySqlPool,
    /// Event repository.
    pub events: MySqlEventRepository,
    /// Series definitions.
    pub series: MySqlSeriesRepository,
    /// Raw data root, when configured.
    data_dir: Option<PathBuf>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            events: MySqlEventRepository::new(pool.clone()),
            series: MySqlSeriesRepository::new(pool.clone()),
            data_dir: None,
            pool,
        }
    }

    /// Read raw capture data from `dir` when inserting events and loading sample data.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let source = Arc::new(FilesystemWaveformSource::new(dir.clone()));
        self.events = MySqlEventRepository::new(self.pool.clone()).with_source(source);
        self.data_dir = Some(dir);
        self
    }

    pub fn data_dir(&self) -> Option<&PathBuf> {
        self.data_dir.as_ref()
    }

    /// Connect to `url` with default pool settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, &PoolConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: &PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Connect using [`DbConfig`], verify the schema and attach its raw data root.
    pub async fn from_config(config: &DbConfig) -> Result<Self> {
        let db = Self::connect_with_config(&config.database_url, &config.pool).await?;
        db.verify().await?;
        Ok(db.with_data_dir(config.data_dir.clone()))
    }

    /// Check required tables and the session time zone.
    pub async fn verify(&self) -> Result<()> {
        verify_database(&self.pool).await
    }

    /// Connect to test database (for integration tests).
    #[cfg(test)]
    pub async fn connect_test() -> Result<Self> {
        Self::connect(&test_fixtures::test_database_url()).await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}
