// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::settings::{SettingsStorage, KEY_ENABLED, KEY_STORAGE_MAX_SIZE};
use crate::config::snapshot::ConfigSnapshot;

type SnapshotSender = watch::Sender<Arc<ConfigSnapshot>>;

/// Publishes the current [`ConfigSnapshot`].
///
/// Cloning is cheap; all clones observe the same snapshot. Reads never wait on
/// writers beyond the watch channel's short read lock.
#[derive(Clone)]
pub struct ConfigProvider {
    tx: Arc<SnapshotSender>,
    settings: Arc<Mutex<Option<Arc<dyn SettingsStorage>>>>,
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl Default for ConfigProvider {
    fn default() -> Self {
        Self::new(ConfigSnapshot::default())
    }
}

impl ConfigProvider {
    #[must_use]
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        let (tx, _) = watch::channel(Arc::new(snapshot));
        ConfigProvider {
            tx: Arc::new(tx),
            settings: Arc::new(Mutex::new(None)),
        }
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.tx.borrow().clone()
    }

    /// Publishes a modified copy of the current snapshot.
    pub fn update(&self, f: impl FnOnce(&mut ConfigSnapshot)) {
        apply(&self.tx, f);
    }

    /// Receiver notified whenever a new snapshot is published.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }

    /// Turns the store on or off, persisting the choice to bound settings storage.
    pub fn set_enabled(&self, enabled: bool) {
        self.update(|snapshot| snapshot.enabled = enabled);
        self.write_through(KEY_ENABLED, if enabled { "true" } else { "false" });
    }

    /// Changes the byte ceiling, persisting it to bound settings storage.
    pub fn set_max_storage_bytes(&self, bytes: u64) {
        self.update(|snapshot| snapshot.max_storage_bytes = bytes);
        self.write_through(KEY_STORAGE_MAX_SIZE, &bytes.to_string());
    }

    /// Seeds the snapshot from `settings` and follows later writes to it.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn bind(&self, settings: Arc<dyn SettingsStorage>) {
        if let Some(value) = settings.read(KEY_STORAGE_MAX_SIZE) {
            apply_max_size(&self.tx, &value);
        }
        if let Some(value) = settings.read(KEY_ENABLED) {
            apply_enabled(&self.tx, &value);
        }

        // Weak references keep the storage's callback registry from owning the
        // provider.
        let tx: Weak<SnapshotSender> = Arc::downgrade(&self.tx);
        settings.on_change(
            KEY_STORAGE_MAX_SIZE,
            Arc::new(move |value| {
                if let Some(tx) = tx.upgrade() {
                    apply_max_size(&tx, value);
                }
            }),
        );
        let tx: Weak<SnapshotSender> = Arc::downgrade(&self.tx);
        settings.on_change(
            KEY_ENABLED,
            Arc::new(move |value| {
                if let Some(tx) = tx.upgrade() {
                    apply_enabled(&tx, value);
                }
            }),
        );

        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings);
    }

    fn write_through(&self, key: &str, value: &str) {
        let settings = self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(settings) = settings {
            if let Err(e) = settings.write(key, value) {
                error!("Failed to persist setting {key}: {e}");
            }
        }
    }
}

fn apply(tx: &SnapshotSender, f: impl FnOnce(&mut ConfigSnapshot)) {
    tx.send_modify(|current| {
        let mut next = ConfigSnapshot::clone(current);
        f(&mut next);
        *current = Arc::new(next);
    });
}

fn apply_max_size(tx: &SnapshotSender, value: &str) {
    match value.trim().parse::<u64>() {
        Ok(0) => warn!("Ignoring {KEY_STORAGE_MAX_SIZE} of zero"),
        Ok(bytes) => {
            if tx.borrow().max_storage_bytes != bytes {
                debug!("Storage ceiling set to {bytes} bytes");
                apply(tx, |snapshot| snapshot.max_storage_bytes = bytes);
            }
        }
        Err(e) => warn!("Ignoring invalid {KEY_STORAGE_MAX_SIZE} value {value:?}: {e}"),
    }
}

fn apply_enabled(tx: &SnapshotSender, value: &str) {
    let enabled = match value.trim().to_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => {
            warn!("Ignoring invalid {KEY_ENABLED} value {value:?}");
            return;
        }
    };
    if tx.borrow().enabled != enabled {
        debug!("Log store enabled: {enabled}");
        apply(tx, |snapshot| snapshot.enabled = enabled);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::settings::MemorySettings;

    #[test]
    fn test_update_publishes_new_snapshot() {
        let provider = ConfigProvider::default();
        let before = provider.current();

        provider.update(|s| s.batch_max_count = 7);

        assert_eq!(before.batch_max_count, 100);
        assert_eq!(provider.current().batch_max_count, 7);
    }

    #[test]
    fn test_clones_share_state() {
        let provider = ConfigProvider::default();
        let clone = provider.clone();

        clone.set_enabled(false);

        assert!(!provider.current().enabled);
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let provider = ConfigProvider::default();
        let mut rx = provider.subscribe();

        provider.set_max_storage_bytes(1234);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().max_storage_bytes, 1234);
    }

    #[test]
    fn test_bind_seeds_from_settings() {
        let provider = ConfigProvider::default();
        let settings = Arc::new(MemorySettings::with_values([
            (KEY_STORAGE_MAX_SIZE, "4096"),
            (KEY_ENABLED, "false"),
        ]));

        provider.bind(settings);

        let snapshot = provider.current();
        assert_eq!(snapshot.max_storage_bytes, 4096);
        assert!(!snapshot.enabled);
    }

    #[test]
    fn test_settings_writes_apply_to_next_read() {
        let provider = ConfigProvider::default();
        let settings = Arc::new(MemorySettings::new());
        provider.bind(settings.clone());

        settings.write(KEY_STORAGE_MAX_SIZE, "2048").unwrap();
        settings.write(KEY_ENABLED, "false").unwrap();

        assert_eq!(provider.current().max_storage_bytes, 2048);
        assert!(!provider.current().enabled);
    }

    #[test]
    fn test_invalid_settings_are_ignored() {
        let provider = ConfigProvider::default();
        let settings = Arc::new(MemorySettings::with_values([
            (KEY_STORAGE_MAX_SIZE, "huge"),
            (KEY_ENABLED, "perhaps"),
        ]));

        provider.bind(settings.clone());
        settings.write(KEY_STORAGE_MAX_SIZE, "0").unwrap();

        assert_eq!(provider.current().as_ref(), &ConfigSnapshot::default());
    }

    #[test]
    fn test_set_enabled_writes_through() {
        let provider = ConfigProvider::default();
        let settings = Arc::new(MemorySettings::new());
        provider.bind(settings.clone());

        provider.set_enabled(false);
        provider.set_max_storage_bytes(512);

        assert_eq!(settings.read(KEY_ENABLED).as_deref(), Some("false"));
        assert_eq!(settings.read(KEY_STORAGE_MAX_SIZE).as_deref(), Some("512"));
        assert!(!provider.current().enabled);
    }
}
