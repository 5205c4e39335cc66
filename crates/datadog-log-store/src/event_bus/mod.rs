// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outcome events for observers of the store, such as a settings panel that
//! shows how much is queued and what was dropped.
//!
//! ```text
//! LogStore ─┬─ RecordsEvicted ──┐
//!           ├─ StorageFull ─────┤
//!           └─ CorruptFrames ───┼──> MPSC ──> rx
//! Pipeline ─┬─ BatchDelivered ──┤
//!           └─ BatchAbandoned ──┘
//! ```
//!
//! Events are sent with `try_send`, so a slow or absent consumer never stalls
//! an append or a delivery.

use tokio::sync::mpsc::{self, Sender};
use tracing::debug;

use crate::event_bus::constants::MAX_EVENTS;

mod constants;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    /// Pending records were evicted to stay under the byte ceiling.
    RecordsEvicted { count: usize, bytes: u64 },

    /// An append was refused because only in-flight records could make room.
    StorageFull { needed: u64 },

    /// Frames were skipped while replaying the journal.
    CorruptFrames { count: u64 },

    /// A batch was accepted by the transport.
    BatchDelivered { count: usize },

    /// A batch was dropped after a permanent failure or too many attempts.
    BatchAbandoned { count: usize },

    /// Shutdown signal for the consumer.
    Tombstone,
}

#[allow(clippy::module_name_repetitions)]
pub struct EventBus {
    pub rx: mpsc::Receiver<Event>,
}

impl EventBus {
    #[must_use]
    pub fn run() -> (EventBus, Sender<Event>) {
        let (tx, rx) = mpsc::channel(MAX_EVENTS);
        let event_bus = EventBus { rx };
        (event_bus, tx)
    }
}

/// Sends `event` if a bus is attached and has room.
pub(crate) fn emit(tx: Option<&Sender<Event>>, event: Event) {
    if let Some(tx) = tx {
        if let Err(e) = tx.try_send(event) {
            debug!("Dropping event {:?}: {}", event, e);
        }
    }
}
