//! Environment driven configuration.
//!
//! Values come from the process environment (populated from `.env` by the
//! binaries through `dotenvy`). Only `DATABASE_URL` is required.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use wfb_core::defaults::{
    DATA_DIR, ENV_DATABASE_URL, ENV_DATA_DIR, ENV_DB_CONNECT_TIMEOUT_SECS, ENV_DB_MAX_CONNECTIONS,
};
use wfb_core::{Error, Result};

use crate::pool::PoolConfig;

/// Connection and raw data settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DbConfig {
    pub database_url: String,
    /// Root directory of the raw capture data.
    pub data_dir: PathBuf,
    pub pool: PoolConfig,
}

impl DbConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            data_dir: PathBuf::from(DATA_DIR),
            pool: PoolConfig::default(),
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(ENV_DATABASE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("{} is not set", ENV_DATABASE_URL)))?;

        let mut config = Self::new(database_url);

        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(n) = parse_var::<u32>(&lookup, ENV_DB_MAX_CONNECTIONS)? {
            if n == 0 {
                return Err(Error::Config(format!("{} must be at least 1", ENV_DB_MAX_CONNECTIONS)));
            }
            config.pool = config.pool.max_connections(n);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_DB_CONNECT_TIMEOUT_SECS)? {
            config.pool = config.pool.connect_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}
