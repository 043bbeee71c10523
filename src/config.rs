//! Configuration management for the task board.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `TASKBOARD_STORE` - Optional. `memory`, `sqlite` or `supabase`. Defaults to `sqlite`.
//! - `TASKBOARD_DATA_DIR` - Optional. Directory for the SQLite file. Defaults to `./.taskboard`.
//! - `SUPABASE_URL` - Required for the `supabase` store. Supabase project URL.
//! - `SUPABASE_SERVICE_ROLE_KEY` - Required for the `supabase` store. Service role key.
//! - `TASKBOARD_CHANGE_BUFFER` - Optional. Change feed capacity. Defaults to `256`.

use std::path::PathBuf;
use thiserror::Error;

use crate::api::task_store::TaskStoreType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Task storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Which backend to use
    pub store_type: TaskStoreType,

    /// Directory holding `taskboard.db` for the SQLite store
    pub data_dir: PathBuf,

    /// Supabase project URL
    pub supabase_url: Option<String>,

    /// Supabase service role key (for full access)
    pub supabase_service_role_key: Option<String>,

    /// Capacity of the change feed before slow subscribers lag
    pub change_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: TaskStoreType::default(),
            data_dir: PathBuf::from(".taskboard"),
            supabase_url: None,
            supabase_service_role_key: None,
            change_buffer: 256,
        }
    }
}

impl StoreConfig {
    /// In-memory store, for tests and throwaway runs.
    pub fn memory() -> Self {
        Self {
            store_type: TaskStoreType::Memory,
            ..Self::default()
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Task storage configuration
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if the Supabase store is selected
    /// without its credentials, and `ConfigError::InvalidValue` for values
    /// that do not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let store_type = match lookup("TASKBOARD_STORE") {
            Some(raw) => TaskStoreType::parse(&raw)
                .ok_or_else(|| ConfigError::InvalidValue("TASKBOARD_STORE".to_string(), raw))?,
            None => TaskStoreType::default(),
        };

        let data_dir = lookup("TASKBOARD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".taskboard"));

        let change_buffer: usize = lookup("TASKBOARD_CHANGE_BUFFER")
            .unwrap_or_else(|| "256".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("TASKBOARD_CHANGE_BUFFER".to_string(), format!("{}", e))
            })?;
        if change_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "TASKBOARD_CHANGE_BUFFER".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let supabase_url = lookup("SUPABASE_URL").filter(|v| !v.trim().is_empty());
        let supabase_service_role_key =
            lookup("SUPABASE_SERVICE_ROLE_KEY").filter(|v| !v.trim().is_empty());

        if store_type == TaskStoreType::Supabase {
            if supabase_url.is_none() {
                return Err(ConfigError::MissingEnvVar("SUPABASE_URL".to_string()));
            }
            if supabase_service_role_key.is_none() {
                return Err(ConfigError::MissingEnvVar(
                    "SUPABASE_SERVICE_ROLE_KEY".to_string(),
                ));
            }
        }

        Ok(Self {
            host,
            port,
            store: StoreConfig {
                store_type,
                data_dir,
                supabase_url,
                supabase_service_role_key,
                change_buffer,
            },
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(store: StoreConfig) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            store,
        }
    }
}
