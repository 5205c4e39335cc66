// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of batches through a [`Transport`] with at-least-once semantics.
//!
//! ```text
//!            ┌──────────── Success ───────────> acknowledge ──> Delivered
//!            │
//!  send ─────┼──── PermanentFailure ──────────> fail ─────────> Abandoned
//!   ^        │
//!   │        └──── TransientFailure ──┬─ attempts left ─> release, backoff
//!   │                                 │                        │
//!   └──────────── reacquire <─────────┼────────────────────────┘
//!                                     └─ exhausted ─────> fail ──> Abandoned
//! ```
//!
//! Records stay in the store until the transport accepts or definitively
//! rejects them, so a crash at any point re-delivers rather than loses.

use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::{mpsc::Sender, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use zstd::stream::write::Encoder;

use crate::config::ConfigSnapshot;
use crate::event_bus::{emit, Event};
use crate::store::{Batch, LogStore};
use crate::transport::{Transport, TransportRequest, TransportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The transport accepted the batch and its records were removed.
    Delivered,
    /// The batch was dropped after a permanent failure or too many attempts.
    Abandoned,
    /// Delivery was cancelled; the records are pending again.
    Released,
    /// Every record of the batch was evicted while waiting to retry.
    Evicted,
}

pub struct DeliveryPipeline {
    store: Arc<LogStore>,
    transport: Arc<dyn Transport>,
    // One batch in delivery at a time.
    delivery_lock: Mutex<()>,
    events: Option<Sender<Event>>,
}

impl DeliveryPipeline {
    #[must_use]
    pub fn new(store: Arc<LogStore>, transport: Arc<dyn Transport>) -> Self {
        DeliveryPipeline {
            store,
            transport,
            delivery_lock: Mutex::new(()),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: Sender<Event>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Delivers `batch`, retrying transient failures with exponential backoff.
    ///
    /// The batch's records must be in flight, as returned by
    /// [`LogStore::peek_batch`]. Cancellation is honoured before each attempt
    /// and while backing off, and leaves the records pending.
    pub async fn deliver(
        &self,
        batch: Batch,
        config: &ConfigSnapshot,
        cancel_token: &CancellationToken,
    ) -> DeliveryOutcome {
        let _delivering = self.delivery_lock.lock().await;

        if batch.is_empty() {
            return DeliveryOutcome::Evicted;
        }

        let mut batch = batch;
        let mut attempt: u32 = 0;
        loop {
            if cancel_token.is_cancelled() {
                self.store.release(&batch);
                debug!(
                    "PIPELINE | Cancelled before attempt {}, released {} records",
                    attempt + 1,
                    batch.len()
                );
                return DeliveryOutcome::Released;
            }

            attempt += 1;
            let request = self.build_request(&batch, config);
            match self.transport.send(&request).await {
                TransportResult::Success => {
                    let removed = self.store.acknowledge(&batch);
                    debug!(
                        "PIPELINE | Delivered {} records to {} on attempt {}",
                        removed, request.destination, attempt
                    );
                    emit(
                        self.events.as_ref(),
                        Event::BatchDelivered { count: removed },
                    );
                    return DeliveryOutcome::Delivered;
                }
                TransportResult::PermanentFailure(reason) => {
                    error!(
                        "PIPELINE | Batch of {} records rejected, dropping it: {}",
                        batch.len(),
                        reason
                    );
                    return self.abandon(&batch);
                }
                TransportResult::TransientFailure(reason) => {
                    if attempt >= config.retry.max_attempts {
                        error!(
                            "PIPELINE | Failed to deliver {} records after {} attempts, dropping them: {}",
                            batch.len(),
                            attempt,
                            reason
                        );
                        return self.abandon(&batch);
                    }

                    let delay = config.retry.backoff(attempt);
                    warn!(
                        "PIPELINE | Attempt {} failed: {}, retrying in {} ms",
                        attempt,
                        reason,
                        delay.as_millis()
                    );
                    self.store.release(&batch);

                    tokio::select! {
                        () = cancel_token.cancelled() => {
                            debug!("PIPELINE | Cancelled during backoff, {} records left pending", batch.len());
                            return DeliveryOutcome::Released;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }

                    match self.store.reacquire(&batch) {
                        Some(next) => {
                            if next.len() < batch.len() {
                                debug!(
                                    "PIPELINE | {} records evicted during backoff",
                                    batch.len() - next.len()
                                );
                            }
                            batch = next;
                        }
                        None => {
                            warn!("PIPELINE | Every record of the batch was evicted during backoff");
                            return DeliveryOutcome::Evicted;
                        }
                    }
                }
            }
        }
    }

    fn abandon(&self, batch: &Batch) -> DeliveryOutcome {
        let dropped = self.store.fail(batch);
        emit(
            self.events.as_ref(),
            Event::BatchAbandoned { count: dropped },
        );
        DeliveryOutcome::Abandoned
    }

    fn build_request(&self, batch: &Batch, config: &ConfigSnapshot) -> TransportRequest {
        let (body, compressed) = compress(batch.encode_body(), config);
        TransportRequest {
            destination: config.log_url.clone(),
            body,
            compressed,
            record_count: batch.len(),
            first_sequence: batch.first_sequence().unwrap_or_default(),
            last_sequence: batch.last_sequence().unwrap_or_default(),
            install_id: config.install_id.clone(),
            country_code: config.country_code.clone(),
        }
    }
}

fn compress(data: Vec<u8>, config: &ConfigSnapshot) -> (Vec<u8>, bool) {
    if !config.use_compression {
        return (data, false);
    }

    match encode(&data, config.compression_level) {
        Ok(compressed_data) => (compressed_data, true),
        Err(e) => {
            debug!("PIPELINE | Failed to compress data: {}", e);
            (data, false)
        }
    }
}

fn encode(data: &[u8], level: i32) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut encoder = Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    encoder.finish().map_err(|e| Box::new(e) as Box<dyn Error>)
}
