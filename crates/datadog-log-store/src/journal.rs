// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only journal file backing the store.
//!
//! Records are written as codec frames when appended; removals are written as
//! tombstone frames. Replaying the file rebuilds the set of live records.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::codec::{self, Frame, FrameReader};
use crate::record::{DeliveryState, Record};

/// Journals smaller than this are never compacted.
pub(crate) const COMPACTION_MIN_BYTES: u64 = 64 * 1024;

/// Result of replaying an existing journal.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Live records in sequence order, all `Pending`.
    pub records: Vec<Record>,
    /// Highest sequence number seen in any frame, live or not.
    pub max_sequence: Option<u64>,
    pub corrupt_frames: u64,
    /// Bytes dropped from a torn tail.
    pub truncated_bytes: u64,
}

#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    sync: bool,
}

impl Journal {
    /// Opens (or creates) the journal at `path` and replays its contents.
    pub fn open(path: &Path, sync: bool) -> io::Result<(Journal, Replay)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let (replay, valid_len) = replay(&bytes);

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if valid_len < bytes.len() {
            warn!(
                "STORE | Truncating torn journal tail of {} bytes at offset {valid_len}",
                bytes.len() - valid_len
            );
            file.set_len(valid_len as u64)?;
        }

        debug!(
            "STORE | Replayed journal {}: {} live records, {} corrupt frames",
            path.display(),
            replay.records.len(),
            replay.corrupt_frames
        );

        Ok((
            Journal {
                path: path.to_path_buf(),
                file,
                len: valid_len as u64,
                sync,
            },
            Replay {
                truncated_bytes: (bytes.len() - valid_len) as u64,
                ..replay
            },
        ))
    }

    /// Appends already encoded frames in a single write.
    ///
    /// On failure the file is cut back to its previous length, so a partial
    /// frame never sits in front of later writes.
    pub fn write(&mut self, frames: &[u8]) -> io::Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.append(frames) {
            self.rollback();
            return Err(e);
        }
        self.len += frames.len() as u64;
        Ok(())
    }

    fn append(&mut self, frames: &[u8]) -> io::Result<()> {
        self.file.write_all(frames)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Drops anything past the last complete write.
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            error!(
                "STORE | Failed to roll back journal {} to {} bytes: {}",
                self.path.display(),
                self.len,
                e
            );
        }
    }

    /// Current on-disk size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the journal is worth rewriting given the bytes its live records
    /// would occupy.
    pub fn should_compact(&self, live_bytes: u64) -> bool {
        self.len > COMPACTION_MIN_BYTES && self.len - live_bytes.min(self.len) > live_bytes
    }

    /// Rewrites the journal so it holds only `records`.
    ///
    /// `high_water` is the last sequence number handed out. If no live record
    /// carries it, a tombstone for it is kept so numbering continues after a
    /// restart.
    ///
    /// The new contents go to a temporary file that is synced and renamed over
    /// the journal, so a crash leaves either the old or the new file in place.
    pub fn compact<'a>(
        &mut self,
        records: impl Iterator<Item = &'a Record>,
        high_water: Option<u64>,
    ) -> io::Result<()> {
        let mut buf = Vec::new();
        let mut last_live = None;
        for record in records {
            let durable = Record {
                state: DeliveryState::Pending,
                ..record.clone()
            };
            codec::encode_record_into(&durable, &mut buf);
            last_live = Some(record.sequence);
        }
        if let Some(high_water) = high_water {
            if last_live < Some(high_water) {
                codec::encode_tombstone_into(high_water, &mut buf);
            }
        }

        // The temp handle becomes the journal handle after the rename.
        let temp_path = self.path.with_extension("compact");
        match fs::remove_file(&temp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let mut temp = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&temp_path)?;
        temp.write_all(&buf)?;
        temp.sync_all()?;
        fs::rename(&temp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                // Directory fsync is not supported everywhere.
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }

        let previous = self.len;
        self.file = temp;
        self.len = buf.len() as u64;
        debug!(
            "STORE | Compacted journal from {previous} to {} bytes",
            self.len
        );
        Ok(())
    }
}

/// Rebuilds the live record set from journal bytes.
///
/// Returns the replay and the length of the readable prefix.
fn replay(bytes: &[u8]) -> (Replay, usize) {
    let mut live: BTreeMap<u64, Record> = BTreeMap::new();
    let mut out = Replay::default();
    let mut reader = FrameReader::new(bytes);

    for item in reader.by_ref() {
        match item {
            Ok(Frame::Record(mut record)) => {
                out.max_sequence = out.max_sequence.max(Some(record.sequence));
                if record.state.is_terminal() {
                    live.remove(&record.sequence);
                } else {
                    record.state = DeliveryState::Pending;
                    live.insert(record.sequence, record);
                }
            }
            Ok(Frame::Tombstone(sequence)) => {
                out.max_sequence = out.max_sequence.max(Some(sequence));
                live.remove(&sequence);
            }
            Err(corrupt) => {
                warn!(
                    "STORE | Skipping corrupt journal frame at offset {} ({} bytes): {}",
                    corrupt.offset, corrupt.len, corrupt.error
                );
                out.corrupt_frames += 1;
            }
        }
    }

    out.records = live.into_values().collect();
    (out, reader.valid_len())
}
