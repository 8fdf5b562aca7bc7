//! Store configuration and construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File};
use octofhir_core::events::EventBroadcaster;
use octofhir_storage::{DynStore, EventedStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::SearchParameterRegistry;
use crate::storage::InMemoryStore;

/// Environment prefix, e.g. `OCTOFHIR_STORE__SEARCH__MAX_COUNT=50`.
pub const ENV_PREFIX: &str = "OCTOFHIR_STORE";
const DEFAULT_CONFIG_FILE: &str = "octofhir-store.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub locking: LockingSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub events: EventSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_count")]
    pub default_count: usize,
    #[serde(default = "default_max_count")]
    pub max_count: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_count: default_count(),
            max_count: default_max_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockingSettings {
    /// Upper bound on waiting for a per-id write lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for LockingSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Reject writes and searches for types without a descriptor.
    #[serde(default)]
    pub strict_types: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_count() -> usize {
    10
}
fn default_max_count() -> usize {
    100
}
fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_buffer_size() -> usize {
    octofhir_core::events::broadcaster::DEFAULT_BUFFER_SIZE
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.default_count == 0 {
            return Err(ConfigError::Invalid(
                "search.default_count must be > 0".into(),
            ));
        }
        if self.search.max_count == 0 {
            return Err(ConfigError::Invalid("search.max_count must be > 0".into()));
        }
        if self.search.default_count > self.search.max_count {
            return Err(ConfigError::Invalid(
                "search.default_count must be <= search.max_count".into(),
            ));
        }
        if self.locking.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "locking.lock_timeout_ms must be > 0".into(),
            ));
        }
        if self.events.buffer_size == 0 {
            return Err(ConfigError::Invalid("events.buffer_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locking.lock_timeout_ms)
    }

    /// Page size for a requested count, clamped to `max_count`.
    pub fn page_size(&self, requested: Option<u32>) -> usize {
        requested
            .map_or(self.search.default_count, |c| c as usize)
            .min(self.search.max_count)
    }
}

/// Load configuration from an optional TOML file plus environment overrides.
///
/// Without a path, `octofhir-store.toml` in the working directory is used if
/// present.
pub fn load_config(path: Option<&Path>) -> Result<StoreConfig, ConfigError> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            builder = builder.add_source(File::from(p.to_path_buf()));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    let merged: StoreConfig = builder.build()?.try_deserialize()?;
    merged.validate()?;
    Ok(merged)
}

/// Build a shareable store from configuration.
pub fn create_store(config: StoreConfig, registry: SearchParameterRegistry) -> DynStore {
    Arc::new(
        InMemoryStore::builder()
            .config(config)
            .registry(registry)
            .build(),
    )
}

/// Build a store that publishes committed changes to a fresh broadcaster.
pub fn create_evented_store(
    config: StoreConfig,
    registry: SearchParameterRegistry,
) -> (DynStore, Arc<EventBroadcaster>) {
    let broadcaster = Arc::new(EventBroadcaster::with_capacity(config.events.buffer_size));
    let store = InMemoryStore::builder()
        .config(config)
        .registry(registry)
        .build();
    let evented: DynStore = Arc::new(EventedStore::new(store, broadcaster.clone()));
    (evented, broadcaster)
}
