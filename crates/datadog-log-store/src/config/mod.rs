// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration Module
//!
//! Static configuration is loaded once at startup; the runtime view of it is a
//! [`ConfigSnapshot`] published through a [`ConfigProvider`], which settings
//! storage can update while the store is running.
//!
//! ## Configuration Priority
//!
//! Sources are applied in the following order (later sources override earlier):
//!
//! 1. **Defaults** - hard-coded in [`Config::default`]
//! 2. **YAML file** - `log_store.yaml` in the configuration directory (if present)
//! 3. **Environment variables** - `DD_*` (highest priority)
//!
//! A source that fails to parse is logged and skipped. Only validation errors
//! (missing storage path, zero limits) are fatal.

pub mod env;
pub mod log_level;
pub mod provider;
pub mod settings;
pub mod snapshot;
pub mod yaml;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{env::EnvConfigSource, log_level::LogLevel, yaml::YamlConfigSource};

pub use provider::ConfigProvider;
pub use settings::{MemorySettings, SettingsError, SettingsStorage};
pub use snapshot::{ConfigSnapshot, RetryPolicy};

/// Name of the YAML file looked up in the configuration directory.
pub const CONFIG_FILE_NAME: &str = "log_store.yaml";

pub const DEFAULT_STORAGE_MAX_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BATCH_MAX_COUNT: usize = 100;
pub const DEFAULT_BATCH_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Helper macro to merge `Option<T>` source fields into `T` config fields when set
///
/// Providing one field argument merges the source field of the same name.
/// Providing two field arguments merges `$source.$source_field` into
/// `$config.$config_field`.
#[macro_export]
macro_rules! merge_option_to_value {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field = value.clone();
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field = value.clone();
        }
    };
}

#[derive(Debug, Error, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[allow(clippy::module_name_repetitions)]
pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

/// Static configuration of the store, the delivery pipeline and the host process.
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    /// Journal file location. Required.
    pub storage_path: Option<PathBuf>,
    pub storage_max_size: u64,
    /// Sync the journal to disk after every write.
    pub storage_sync: bool,

    pub batch_max_count: usize,
    pub batch_max_bytes: u64,
    pub flush_interval: Duration,

    pub enabled: bool,

    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    /// Flush destination handed to the transport.
    pub log_url: String,
    pub install_id: String,
    pub country_code: String,

    pub use_compression: bool,
    pub compression_level: i32,

    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: None,
            storage_max_size: DEFAULT_STORAGE_MAX_SIZE,
            storage_sync: false,
            batch_max_count: DEFAULT_BATCH_MAX_COUNT,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            enabled: true,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            log_url: String::new(),
            install_id: String::new(),
            country_code: String::new(),
            use_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .storage_path
            .as_ref()
            .map_or(true, |p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::Missing("storage_path"));
        }
        if self.storage_max_size == 0 {
            return Err(invalid("storage_max_size", "must be greater than zero"));
        }
        if self.batch_max_count == 0 {
            return Err(invalid("batch_max_count", "must be greater than zero"));
        }
        if self.batch_max_bytes == 0 {
            return Err(invalid("batch_max_bytes", "must be greater than zero"));
        }
        if self.retry_max_attempts == 0 {
            return Err(invalid("retry_max_attempts", "must be greater than zero"));
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(invalid(
                "retry_base_delay",
                format!(
                    "{}ms exceeds retry_max_delay of {}ms",
                    self.retry_base_delay.as_millis(),
                    self.retry_max_delay.as_millis()
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

#[allow(clippy::module_name_repetitions)]
impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Applies every source in order, then validates the result.
    pub fn build(&mut self) -> Result<Config, ConfigError> {
        let mut failed_sources = 0;
        for source in &self.sources {
            match source.load(&mut self.config) {
                Ok(()) => (),
                Err(e) => {
                    error!("Failed to load config: {}", e);
                    failed_sources += 1;
                }
            }
        }

        if !self.sources.is_empty() && failed_sources == self.sources.len() {
            debug!("All sources failed to load config, using default config.");
        }

        self.config.validate()?;
        Ok(self.config.clone())
    }
}

/// Loads configuration from `log_store.yaml` in `config_directory` and the environment.
#[allow(clippy::module_name_repetitions)]
pub fn get_config(config_directory: &Path) -> Result<Config, ConfigError> {
    let path: PathBuf = config_directory.join(CONFIG_FILE_NAME);
    ConfigBuilder::default()
        .add_source(Box::new(YamlConfigSource { path }))
        .add_source(Box::new(EnvConfigSource))
        .build()
}

pub fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s.trim().to_string()))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        _ => {
            error!("Failed to parse value, expected a string or an integer, ignoring");
            Ok(None)
        }
    }
}

pub fn deserialize_option_lossless<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to deserialize optional value: {}, ignoring", e);
            Ok(None)
        }
    }
}

pub fn deserialize_optional_bool_from_anything<'de, D>(
    deserializer: D,
) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => {
                error!("Failed to parse bool value: {}, ignoring", n);
                Ok(None)
            }
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            other => {
                error!("Failed to parse bool value: {}, ignoring", other);
                Ok(None)
            }
        },
        other => {
            error!("Failed to parse bool value: {}, ignoring", other);
            Ok(None)
        }
    }
}

pub fn deserialize_optional_duration_from_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Ok(deserialize_option_lossless::<D, u64>(deserializer)?.map(Duration::from_millis))
}
