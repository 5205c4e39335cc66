// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::time::Instant;
use tracing::debug;

use crate::config::ConfigSnapshot;
use crate::store::{Batch, LogStore};

/// Pulls batches from the store at most once per flush interval.
///
/// The interval is measured from the last call that returned a batch, so an
/// empty store does not delay the first batch after it fills up.
#[derive(Debug, Default)]
pub struct Batcher {
    last_batch: Option<Instant>,
}

impl Batcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next batch of pending records, or `None` when the store is disabled,
    /// nothing is pending, or the flush interval has not elapsed yet.
    pub fn next_batch(&mut self, store: &LogStore, config: &ConfigSnapshot) -> Option<Batch> {
        if !config.enabled {
            return None;
        }
        if let Some(last) = self.last_batch {
            if last.elapsed() < config.flush_interval {
                return None;
            }
        }

        let batch = store.peek_batch(config.batch_max_count, config.batch_max_bytes)?;
        debug!(
            "PIPELINE | Next batch of {} records, sequences {:?}..={:?}",
            batch.len(),
            batch.first_sequence(),
            batch.last_sequence()
        );
        self.last_batch = Some(Instant::now());
        Some(batch)
    }

    /// Lets the next call through regardless of the flush interval.
    pub fn force_next(&mut self) {
        self.last_batch = None;
    }
}
