// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use async_trait::async_trait;
use datadog_log_store::{Transport, TransportRequest, TransportResult};
use tracing::debug;

/// Writes each batch body to its own file under a spool directory.
///
/// Files are named after the batch's sequence range, so a batch that is
/// retried overwrites its earlier copy.
pub struct SpoolTransport {
    dir: PathBuf,
}

impl SpoolTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SpoolTransport { dir: dir.into() }
    }

    fn file_name(request: &TransportRequest) -> String {
        let extension = if request.compressed { "batch.zst" } else { "batch" };
        format!(
            "{:020}-{:020}.{extension}",
            request.first_sequence, request.last_sequence
        )
    }
}

#[async_trait]
impl Transport for SpoolTransport {
    async fn send(&self, request: &TransportRequest) -> TransportResult {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            return TransportResult::TransientFailure(format!(
                "cannot create {}: {e}",
                self.dir.display()
            ));
        }

        let path = self.dir.join(Self::file_name(request));
        match tokio::fs::write(&path, &request.body).await {
            Ok(()) => {
                debug!(
                    "SPOOL | Wrote {} records ({} bytes) to {}",
                    request.record_count,
                    request.body.len(),
                    path.display()
                );
                TransportResult::Success
            }
            Err(e) => {
                TransportResult::TransientFailure(format!("cannot write {}: {e}", path.display()))
            }
        }
    }
}
