// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// Delivery state of a stored record.
///
/// Records start `Pending`, become `InFlight` when selected into a batch and
/// leave the store once `Delivered` or `FailedPermanent`. In-flight state is
/// not durable: a record that was in flight when the process stopped comes back
/// as `Pending` on the next start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    Pending,
    InFlight,
    Delivered,
    FailedPermanent,
}

impl DeliveryState {
    /// Whether the record has reached a terminal state and must be purged.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::FailedPermanent)
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            DeliveryState::Pending => 0,
            DeliveryState::InFlight => 1,
            DeliveryState::Delivered => 2,
            DeliveryState::FailedPermanent => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(DeliveryState::Pending),
            1 => Some(DeliveryState::InFlight),
            2 => Some(DeliveryState::Delivered),
            3 => Some(DeliveryState::FailedPermanent),
            _ => None,
        }
    }
}

/// A single telemetry log entry owned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Monotonic, unique sequence number assigned at append.
    pub sequence: u64,
    /// Opaque payload bytes supplied by the producer.
    pub payload: Vec<u8>,
    /// Insertion time in milliseconds since the UNIX epoch.
    pub timestamp_ms: u64,
    pub state: DeliveryState,
}

impl Record {
    /// Creates a pending record stamped with the current wall-clock time.
    #[must_use]
    pub fn new(sequence: u64, payload: Vec<u8>) -> Self {
        Record {
            sequence,
            payload,
            timestamp_ms: now_millis(),
            state: DeliveryState::Pending,
        }
    }

    /// Size of the record as counted against the storage ceiling.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
