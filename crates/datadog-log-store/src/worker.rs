// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background task driving batches from the store through the pipeline.
//!
//! The worker owns the [`Batcher`] and runs until its cancellation token
//! fires. A batch that is backing off when shutdown arrives goes back to
//! pending and is picked up again from the journal on the next start.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batcher::Batcher;
use crate::config::ConfigProvider;
use crate::pipeline::{DeliveryOutcome, DeliveryPipeline};
use crate::store::LogStore;

/// Shortest pause between two passes, so a zero flush interval does not spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct DeliveryWorker {
    store: Arc<LogStore>,
    pipeline: Arc<DeliveryPipeline>,
    batcher: Batcher,
    provider: ConfigProvider,
    cancel_token: CancellationToken,
}

impl DeliveryWorker {
    #[must_use]
    pub fn new(
        store: Arc<LogStore>,
        pipeline: Arc<DeliveryPipeline>,
        provider: ConfigProvider,
    ) -> Self {
        DeliveryWorker {
            store,
            pipeline,
            batcher: Batcher::new(),
            provider,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Token that stops [`DeliveryWorker::run`] when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Delivers batches until cancelled.
    pub async fn run(mut self) {
        let mut config_rx = self.provider.subscribe();
        debug!("WORKER | Started");

        loop {
            if let Some(outcome) = self.flush_once().await {
                debug!("WORKER | Batch finished: {:?}", outcome);
            }

            let wait = self.provider.current().flush_interval.max(MIN_POLL_INTERVAL);
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!("WORKER | Received shutdown signal, {} records pending", self.store.pending_count());
                    break;
                }
                Ok(()) = config_rx.changed() => {
                    debug!("WORKER | Configuration changed");
                    self.store.refresh_config();
                }
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Runs one batch through the pipeline if the batcher hands one out.
    pub async fn flush_once(&mut self) -> Option<DeliveryOutcome> {
        let config = self.provider.current();
        let batch = self.batcher.next_batch(&self.store, &config)?;
        Some(
            self.pipeline
                .deliver(batch, &config, &self.cancel_token)
                .await,
        )
    }

    /// Like [`DeliveryWorker::flush_once`], ignoring the flush interval.
    pub async fn flush_now(&mut self) -> Option<DeliveryOutcome> {
        self.batcher.force_next();
        self.flush_once().await
    }
}
