// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persisted user preferences consumed by the store.
//!
//! The concrete storage (a preferences file, a platform settings API) lives
//! outside this crate; [`MemorySettings`] is the in-process implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

/// Key holding the store's byte ceiling, as a decimal string.
pub const KEY_STORAGE_MAX_SIZE: &str = "storage_max_size";
/// Key holding the master switch, `"true"` or `"false"`.
pub const KEY_ENABLED: &str = "enabled";

/// Invoked with the new value after a key changes.
pub type ChangeCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("settings storage unavailable: {0}")]
    Unavailable(String),
}

pub trait SettingsStorage: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;

    fn write(&self, key: &str, value: &str) -> Result<(), SettingsError>;

    /// Registers `callback` to run after every successful write to `key`.
    fn on_change(&self, key: &str, callback: ChangeCallback);
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
    callbacks: Mutex<HashMap<String, Vec<ChangeCallback>>>,
}

impl MemorySettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MemorySettings {
            values: Mutex::new(values),
            callbacks: Mutex::default(),
        }
    }
}

impl SettingsStorage for MemorySettings {
    fn read(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());

        // Callbacks run without either lock held so they may read or write back.
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback(value);
        }
        Ok(())
    }

    fn on_change(&self, key: &str, callback: ChangeCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push(callback);
    }
}
