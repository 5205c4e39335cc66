// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

/// A batch ready to leave the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Flush destination, the configured log URL.
    pub destination: String,
    /// Concatenated record frames, zstd-compressed when `compressed` is set.
    pub body: Vec<u8>,
    pub compressed: bool,
    pub record_count: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub install_id: String,
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportResult {
    Success,
    /// Worth retrying: timeouts, connection errors, server errors, throttling.
    TransientFailure(String),
    /// The destination rejected the batch; retrying will not help.
    PermanentFailure(String),
}

impl TransportResult {
    /// Classifies an HTTP status code.
    ///
    /// 2xx succeeds. 4xx is permanent except 408 and 429. Anything else is transient.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => TransportResult::Success,
            408 | 429 => TransportResult::TransientFailure(format!("status {status}")),
            400..=499 => TransportResult::PermanentFailure(format!("status {status}")),
            _ => TransportResult::TransientFailure(format!("status {status}")),
        }
    }
}

/// Sends batches to their destination.
///
/// Implementations own timeouts; a request that times out is a
/// [`TransportResult::TransientFailure`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TransportRequest) -> TransportResult;
}
