// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock transports for driving the delivery pipeline in tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use datadog_log_store::codec::{Frame, FrameReader};
use datadog_log_store::{Transport, TransportRequest, TransportResult};

/// Answers each send with the next queued result and succeeds once the queue
/// runs dry.
#[derive(Default)]
pub struct ScriptedTransport {
    results: Mutex<VecDeque<TransportResult>>,
    requests: Mutex<Vec<TransportRequest>>,
    delivered: Mutex<Vec<TransportRequest>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new(results: impl IntoIterator<Item = TransportResult>) -> Self {
        ScriptedTransport {
            results: Mutex::new(results.into_iter().collect()),
            requests: Mutex::default(),
            delivered: Mutex::default(),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(
            std::iter::repeat(TransportResult::TransientFailure(
                "connection refused".to_string(),
            ))
            .take(1000),
        )
    }

    /// Every request sent, including failed attempts.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Payloads of every successfully sent request, in send order.
    pub fn delivered_payloads(&self) -> Vec<Vec<u8>> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .flat_map(|request| payloads(&request.body))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &TransportRequest) -> TransportResult {
        let result = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TransportResult::Success);
        self.requests.lock().unwrap().push(request.clone());
        if result == TransportResult::Success {
            self.delivered.lock().unwrap().push(request.clone());
        }
        result
    }
}

/// Decodes the record payloads carried by an uncompressed request body.
pub fn payloads(body: &[u8]) -> Vec<Vec<u8>> {
    FrameReader::new(body)
        .filter_map(|frame| match frame {
            Ok(Frame::Record(record)) => Some(record.payload),
            _ => None,
        })
        .collect()
}
