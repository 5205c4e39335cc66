// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment variable configuration (`DD_*`).
//!
//! | Variable                 | Meaning                                 |
//! |--------------------------|-----------------------------------------|
//! | `DD_STORAGE_PATH`        | journal file location (required)        |
//! | `DD_STORAGE_MAX_SIZE`    | byte ceiling of the store               |
//! | `DD_STORAGE_SYNC`        | fsync the journal after every write     |
//! | `DD_BATCH_MAX_COUNT`     | records per batch                       |
//! | `DD_BATCH_MAX_BYTES`     | payload bytes per batch                 |
//! | `DD_FLUSH_INTERVAL`      | milliseconds between batches            |
//! | `DD_ENABLED`             | master switch                           |
//! | `DD_RETRY_MAX_ATTEMPTS`  | transport attempts per batch            |
//! | `DD_RETRY_BASE_DELAY`    | first backoff, milliseconds             |
//! | `DD_RETRY_MAX_DELAY`     | backoff cap, milliseconds               |
//! | `DD_LOG_URL`             | flush destination                       |
//! | `DD_INSTALL_ID`          | installation identifier                 |
//! | `DD_COUNTRY_CODE`        | country code attached to requests       |
//! | `DD_USE_COMPRESSION`     | zstd-compress batch bodies              |
//! | `DD_COMPRESSION_LEVEL`   | zstd level                              |
//! | `DD_LOG_LEVEL`           | error, warn, info, debug or trace       |

use std::path::PathBuf;
use std::time::Duration;

use figment::{providers::Env, Figment};
use serde::Deserialize;

use crate::{
    config::{
        deserialize_option_lossless, deserialize_optional_bool_from_anything,
        deserialize_optional_duration_from_millis, deserialize_string_or_int,
        log_level::LogLevel, Config, ConfigError, ConfigSource,
    },
    merge_option_to_value,
};

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfig {
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub storage_path: Option<String>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub storage_max_size: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub storage_sync: Option<bool>,

    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub batch_max_count: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub batch_max_bytes: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    pub flush_interval: Option<Duration>,

    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub enabled: Option<bool>,

    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub retry_max_attempts: Option<u32>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    pub retry_base_delay: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    pub retry_max_delay: Option<Duration>,

    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub log_url: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub install_id: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub country_code: Option<String>,

    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub use_compression: Option<bool>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub compression_level: Option<i32>,

    pub log_level: Option<LogLevel>,
}

fn merge_config(config: &mut Config, env_config: &EnvConfig) {
    if let Some(path) = &env_config.storage_path {
        config.storage_path = Some(PathBuf::from(path));
    }
    merge_option_to_value!(config, env_config, storage_max_size);
    merge_option_to_value!(config, env_config, storage_sync);
    merge_option_to_value!(config, env_config, batch_max_count);
    merge_option_to_value!(config, env_config, batch_max_bytes);
    merge_option_to_value!(config, env_config, flush_interval);
    merge_option_to_value!(config, env_config, enabled);
    merge_option_to_value!(config, env_config, retry_max_attempts);
    merge_option_to_value!(config, env_config, retry_base_delay);
    merge_option_to_value!(config, env_config, retry_max_delay);
    merge_option_to_value!(config, env_config, log_url);
    merge_option_to_value!(config, env_config, install_id);
    merge_option_to_value!(config, env_config, country_code);
    merge_option_to_value!(config, env_config, use_compression);
    merge_option_to_value!(config, env_config, compression_level);
    merge_option_to_value!(config, env_config, log_level);
}

#[derive(Debug, PartialEq, Clone, Copy)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Env::prefixed("DD_"));

        match figment.extract::<EnvConfig>() {
            Ok(env_config) => merge_config(config, &env_config),
            Err(e) => {
                return Err(ConfigError::Parse(format!(
                    "Failed to parse config from environment variables: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_config_overrides_with_environment_variables() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("DD_STORAGE_PATH", "/data/store.journal");
            jail.set_env("DD_STORAGE_MAX_SIZE", "2048");
            jail.set_env("DD_STORAGE_SYNC", "true");
            jail.set_env("DD_BATCH_MAX_COUNT", "10");
            jail.set_env("DD_BATCH_MAX_BYTES", "512");
            jail.set_env("DD_FLUSH_INTERVAL", "250");
            jail.set_env("DD_ENABLED", "false");
            jail.set_env("DD_RETRY_MAX_ATTEMPTS", "2");
            jail.set_env("DD_RETRY_BASE_DELAY", "10");
            jail.set_env("DD_RETRY_MAX_DELAY", "100");
            jail.set_env("DD_LOG_URL", "https://logs.example.com/v1/input");
            jail.set_env("DD_INSTALL_ID", "987654");
            jail.set_env("DD_COUNTRY_CODE", "NZ");
            jail.set_env("DD_USE_COMPRESSION", "1");
            jail.set_env("DD_COMPRESSION_LEVEL", "9");
            jail.set_env("DD_LOG_LEVEL", "TRACE");

            let mut config = Config::default();
            EnvConfigSource.load(&mut config).expect("env should load");

            let expected = Config {
                storage_path: Some(PathBuf::from("/data/store.journal")),
                storage_max_size: 2048,
                storage_sync: true,
                batch_max_count: 10,
                batch_max_bytes: 512,
                flush_interval: Duration::from_millis(250),
                enabled: false,
                retry_max_attempts: 2,
                retry_base_delay: Duration::from_millis(10),
                retry_max_delay: Duration::from_millis(100),
                log_url: "https://logs.example.com/v1/input".to_string(),
                install_id: "987654".to_string(),
                country_code: "NZ".to_string(),
                use_compression: true,
                compression_level: 9,
                log_level: LogLevel::Trace,
            };
            assert_eq!(config, expected);
            Ok(())
        });
    }

    #[test]
    fn test_unparseable_values_are_ignored() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("DD_BATCH_MAX_COUNT", "many");
            jail.set_env("DD_ENABLED", "maybe");
            jail.set_env("DD_FLUSH_INTERVAL", "1000");

            let mut config = Config::default();
            EnvConfigSource.load(&mut config).expect("env should load");

            assert_eq!(config.batch_max_count, Config::default().batch_max_count);
            assert!(config.enabled);
            assert_eq!(config.flush_interval, Duration::from_secs(1));
            Ok(())
        });
    }
}
