// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! YAML file-based configuration.
//!
//! ```yaml
//! storage:
//!   path: /var/lib/datadog/log_store.journal
//!   max_size: 10485760
//!   sync: false
//! batch:
//!   max_count: 100
//!   max_bytes: 1048576
//!   flush_interval: 3000   # milliseconds
//! retry:
//!   max_attempts: 5
//!   base_delay: 1000       # milliseconds
//!   max_delay: 60000       # milliseconds
//! enabled: true
//! log_url: https://logs.example.com/v1/input
//! install_id: 7c5a1e
//! country_code: FR
//! use_compression: true
//! compression_level: 3
//! log_level: debug
//! ```

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
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
pub struct StorageSection {
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub path: Option<String>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_size: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub sync: Option<bool>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BatchSection {
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_count: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_bytes: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    pub flush_interval: Option<Duration>,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RetrySection {
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_attempts: Option<u32>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    pub base_delay: Option<Duration>,
    #[serde(deserialize_with = "deserialize_optional_duration_from_millis")]
    pub max_delay: Option<Duration>,
}

/// The fields of `log_store.yaml`, all optional so they can be merged over
/// the defaults.
#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfig {
    pub storage: StorageSection,
    pub batch: BatchSection,
    pub retry: RetrySection,

    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub enabled: Option<bool>,

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

fn merge_config(config: &mut Config, yaml_config: &YamlConfig) {
    if let Some(path) = &yaml_config.storage.path {
        config.storage_path = Some(PathBuf::from(path));
    }
    merge_option_to_value!(config, storage_max_size, yaml_config.storage, max_size);
    merge_option_to_value!(config, storage_sync, yaml_config.storage, sync);

    merge_option_to_value!(config, batch_max_count, yaml_config.batch, max_count);
    merge_option_to_value!(config, batch_max_bytes, yaml_config.batch, max_bytes);
    merge_option_to_value!(config, flush_interval, yaml_config.batch, flush_interval);

    merge_option_to_value!(config, retry_max_attempts, yaml_config.retry, max_attempts);
    merge_option_to_value!(config, retry_base_delay, yaml_config.retry, base_delay);
    merge_option_to_value!(config, retry_max_delay, yaml_config.retry, max_delay);

    merge_option_to_value!(config, yaml_config, enabled);
    merge_option_to_value!(config, yaml_config, log_url);
    merge_option_to_value!(config, yaml_config, install_id);
    merge_option_to_value!(config, yaml_config, country_code);
    merge_option_to_value!(config, yaml_config, use_compression);
    merge_option_to_value!(config, yaml_config, compression_level);
    merge_option_to_value!(config, yaml_config, log_level);
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Yaml::file(self.path.clone()));

        match figment.extract::<YamlConfig>() {
            Ok(yaml_config) => merge_config(config, &yaml_config),
            Err(e) => {
                return Err(ConfigError::Parse(format!(
                    "Failed to parse config from yaml file: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_merge_config_overrides_with_yaml_file() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "log_store.yaml",
                r#"
storage:
  path: "/var/lib/datadog/store.journal"
  max_size: 65536
  sync: true
batch:
  max_count: 25
  max_bytes: 4096
  flush_interval: 500
retry:
  max_attempts: 3
  base_delay: 250
  max_delay: 2000
enabled: false
log_url: "https://logs.example.com/v1/input"
install_id: 12345
country_code: "FR"
use_compression: "true"
compression_level: 6
log_level: "debug"
"#,
            )?;

            let mut config = Config::default();
            let source = YamlConfigSource {
                path: Path::new("log_store.yaml").to_path_buf(),
            };
            source.load(&mut config).expect("yaml should load");

            let expected = Config {
                storage_path: Some(PathBuf::from("/var/lib/datadog/store.journal")),
                storage_max_size: 65536,
                storage_sync: true,
                batch_max_count: 25,
                batch_max_bytes: 4096,
                flush_interval: Duration::from_millis(500),
                enabled: false,
                retry_max_attempts: 3,
                retry_base_delay: Duration::from_millis(250),
                retry_max_delay: Duration::from_secs(2),
                log_url: "https://logs.example.com/v1/input".to_string(),
                install_id: "12345".to_string(),
                country_code: "FR".to_string(),
                use_compression: true,
                compression_level: 6,
                log_level: LogLevel::Debug,
            };
            assert_eq!(config, expected);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();

            let mut config = Config::default();
            let source = YamlConfigSource {
                path: Path::new("does_not_exist.yaml").to_path_buf(),
            };
            source.load(&mut config).expect("missing file is not an error");

            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_bad_values_are_ignored() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "log_store.yaml",
                r"
storage:
  max_size: lots
batch:
  max_count: 7
",
            )?;

            let mut config = Config::default();
            let source = YamlConfigSource {
                path: Path::new("log_store.yaml").to_path_buf(),
            };
            source.load(&mut config).expect("yaml should load");

            assert_eq!(config.storage_max_size, Config::default().storage_max_size);
            assert_eq!(config.batch_max_count, 7);
            Ok(())
        });
    }
}
