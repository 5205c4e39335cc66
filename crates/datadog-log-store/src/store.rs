// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, size-capped persistent store of log records.
//!
//! # Ceiling
//!
//! The sum of stored payload sizes never exceeds the configured ceiling after
//! a mutation, except when only in-flight records could be evicted to get
//! there: in-flight records are counted but never evicted. The excess clears as
//! soon as the batch holding them is acknowledged, failed or released.
//!
//! # Eviction
//!
//! When an append or a smaller ceiling needs room, the oldest pending records
//! are evicted first, in sequence order.
//!
//! # Durability
//!
//! Every append writes the record frame to the journal before returning, in
//! the same write as the tombstones of any records it evicts. If that write
//! fails the append fails and nothing changes. Removals after delivery are
//! tombstoned too; a failed tombstone write is logged and the record may be
//! delivered again after a restart.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc::Sender, watch};
use tracing::{debug, error, warn};

use crate::codec::{self, MAX_PAYLOAD_BYTES};
use crate::config::{ConfigProvider, ConfigSnapshot};
use crate::event_bus::{emit, Event};
use crate::journal::{Journal, COMPACTION_MIN_BYTES};
use crate::record::{DeliveryState, Record};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payload of {size} bytes exceeds the storage ceiling of {ceiling} bytes")]
    Oversize { size: u64, ceiling: u64 },

    #[error("storage full: {needed} bytes must be freed but only in-flight records remain (ceiling {ceiling} bytes)")]
    StorageFull { needed: u64, ceiling: u64 },

    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One record copied into a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// An ordered window of records selected for delivery.
///
/// The batch owns copies of the payloads, so it can be sent without holding
/// the store lock. It is also the token handed back to
/// [`LogStore::acknowledge`], [`LogStore::release`] and [`LogStore::fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    size_bytes: u64,
}

impl Batch {
    fn new(entries: Vec<BatchEntry>) -> Self {
        let size_bytes = entries.iter().map(|e| e.payload.len() as u64).sum();
        Batch {
            entries,
            size_bytes,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total payload bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn sequences(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|e| e.sequence)
    }

    #[must_use]
    pub fn first_sequence(&self) -> Option<u64> {
        self.entries.first().map(|e| e.sequence)
    }

    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.entries.last().map(|e| e.sequence)
    }

    /// Concatenated codec frames of the batch's records.
    #[must_use]
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(
            self.entries
                .iter()
                .map(|e| e.payload.len() + 32)
                .sum::<usize>(),
        );
        for entry in &self.entries {
            let record = Record {
                sequence: entry.sequence,
                payload: entry.payload.clone(),
                timestamp_ms: entry.timestamp_ms,
                state: DeliveryState::InFlight,
            };
            codec::encode_record_into(&record, &mut body);
        }
        body
    }

    /// Sorted sequence numbers, for membership tests against the store.
    fn sorted_sequences(&self) -> Vec<u64> {
        let mut sequences: Vec<u64> = self.sequences().collect();
        sequences.sort_unstable();
        sequences
    }
}

/// Cumulative counters since the store was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub appended: u64,
    pub evicted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub oversize: u64,
    pub storage_full: u64,
    pub corrupt_frames: u64,
}

#[derive(Debug, Default)]
struct Counters {
    appended: AtomicU64,
    evicted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    oversize: AtomicU64,
    storage_full: AtomicU64,
    corrupt_frames: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Eviction {
    count: usize,
    bytes: u64,
}

#[derive(Debug)]
struct Inner {
    /// Ordered by sequence.
    records: VecDeque<Record>,
    total_bytes: u64,
    max_bytes: u64,
    next_sequence: u64,
    journal: Option<Journal>,
}

impl Inner {
    /// Oldest pending records whose removal frees at least `needed` bytes, or
    /// as many as exist when that is not possible.
    fn eviction_candidates(&self, needed: u64) -> (Vec<u64>, u64) {
        let mut sequences = Vec::new();
        let mut freed = 0;
        for record in &self.records {
            if freed >= needed {
                break;
            }
            if record.state == DeliveryState::Pending {
                sequences.push(record.sequence);
                freed += record.size();
            }
        }
        (sequences, freed)
    }

    /// Sequences of records present in `sorted` that are in `state`.
    fn matching(&self, sorted: &[u64], state: DeliveryState) -> Vec<u64> {
        self.records
            .iter()
            .filter(|r| r.state == state && sorted.binary_search(&r.sequence).is_ok())
            .map(|r| r.sequence)
            .collect()
    }

    fn write_frames(&mut self, frames: &[u8]) -> std::io::Result<()> {
        match self.journal.as_mut() {
            Some(journal) => journal.write(frames),
            None => Ok(()),
        }
    }

    fn tombstone(&mut self, sorted: &[u64]) {
        if sorted.is_empty() || self.journal.is_none() {
            return;
        }
        let mut frames = Vec::with_capacity(sorted.len() * codec::tombstone_len());
        for sequence in sorted {
            codec::encode_tombstone_into(*sequence, &mut frames);
        }
        if let Err(e) = self.write_frames(&frames) {
            error!(
                "STORE | Failed to journal {} tombstones, records may be delivered again after restart: {}",
                sorted.len(),
                e
            );
        }
    }

    /// Drops the records in `sorted` from memory, returning the bytes freed.
    fn remove(&mut self, sorted: &[u64]) -> u64 {
        let mut freed = 0;
        self.records.retain(|r| {
            if sorted.binary_search(&r.sequence).is_ok() {
                freed += r.size();
                false
            } else {
                true
            }
        });
        self.total_bytes -= freed;
        freed
    }

    /// Evicts pending records until the ceiling holds or only in-flight
    /// records remain.
    fn enforce_ceiling(&mut self) -> Eviction {
        if self.total_bytes <= self.max_bytes {
            return Eviction::default();
        }
        let needed = self.total_bytes - self.max_bytes;
        let (sequences, _) = self.eviction_candidates(needed);
        self.tombstone(&sequences);
        let bytes = self.remove(&sequences);
        Eviction {
            count: sequences.len(),
            bytes,
        }
    }

    fn maybe_compact(&mut self) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        if journal.len() <= COMPACTION_MIN_BYTES {
            return;
        }
        let live_bytes: u64 = self
            .records
            .iter()
            .map(|r| codec::encoded_len(r) as u64)
            .sum();
        if !journal.should_compact(live_bytes) {
            return;
        }
        let high_water = self.next_sequence.checked_sub(1);
        if let Err(e) = journal.compact(self.records.iter(), high_water) {
            error!("STORE | Journal compaction failed: {}", e);
        }
    }

    fn pending_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == DeliveryState::Pending)
            .count()
    }
}

/// Size-capped store of log records, safe to share between producers and the
/// delivery worker.
#[derive(Debug)]
pub struct LogStore {
    inner: Mutex<Inner>,
    provider: ConfigProvider,
    usage_tx: watch::Sender<u64>,
    counters: Counters,
    events: Option<Sender<Event>>,
}

impl LogStore {
    /// Opens the store backed by the journal at `path`, replaying whatever it holds.
    pub fn open(path: impl AsRef<Path>, provider: ConfigProvider) -> Result<Self, StoreError> {
        Self::open_with_sync(path, provider, false)
    }

    /// Like [`LogStore::open`]; with `sync` set every journal write is followed
    /// by an fsync.
    pub fn open_with_sync(
        path: impl AsRef<Path>,
        provider: ConfigProvider,
        sync: bool,
    ) -> Result<Self, StoreError> {
        let (journal, replay) = Journal::open(path.as_ref(), sync)?;
        if replay.corrupt_frames > 0 {
            warn!(
                "STORE | Skipped {} corrupt frames while replaying {}",
                replay.corrupt_frames,
                path.as_ref().display()
            );
        }

        let total_bytes = replay.records.iter().map(Record::size).sum();
        let inner = Inner {
            records: replay.records.into(),
            total_bytes,
            max_bytes: provider.current().max_storage_bytes,
            next_sequence: replay.max_sequence.map_or(0, |s| s.saturating_add(1)),
            journal: Some(journal),
        };
        let store = Self::from_inner(inner, provider);
        store
            .counters
            .corrupt_frames
            .store(replay.corrupt_frames, Ordering::Relaxed);

        // The ceiling may have shrunk since the journal was written.
        {
            let mut inner = store.lock();
            let eviction = inner.enforce_ceiling();
            store.note_eviction(eviction, inner.max_bytes);
            inner.maybe_compact();
            store.publish_usage(inner.total_bytes);
        }
        Ok(store)
    }

    /// A store with the same semantics and no journal.
    #[must_use]
    pub fn in_memory(provider: ConfigProvider) -> Self {
        let inner = Inner {
            records: VecDeque::new(),
            total_bytes: 0,
            max_bytes: provider.current().max_storage_bytes,
            next_sequence: 0,
            journal: None,
        };
        Self::from_inner(inner, provider)
    }

    fn from_inner(inner: Inner, provider: ConfigProvider) -> Self {
        let (usage_tx, _) = watch::channel(inner.total_bytes);
        LogStore {
            inner: Mutex::new(inner),
            provider,
            usage_tx,
            counters: Counters::default(),
            events: None,
        }
    }

    /// Attaches an event bus sender. Corruption found while opening is reported
    /// to it right away.
    #[must_use]
    pub fn with_events(mut self, tx: Sender<Event>) -> Self {
        let corrupt = self.counters.corrupt_frames.load(Ordering::Relaxed);
        if corrupt > 0 {
            emit(Some(&tx), Event::CorruptFrames { count: corrupt });
        }
        self.events = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Picks up a ceiling change published since the last operation.
    fn sync_ceiling(&self, inner: &mut Inner, config: &ConfigSnapshot) {
        if inner.max_bytes == config.max_storage_bytes {
            return;
        }
        debug!(
            "STORE | Storage ceiling changed from {} to {} bytes",
            inner.max_bytes, config.max_storage_bytes
        );
        inner.max_bytes = config.max_storage_bytes;
        let eviction = inner.enforce_ceiling();
        self.note_eviction(eviction, inner.max_bytes);
        if eviction.count > 0 {
            inner.maybe_compact();
            self.publish_usage(inner.total_bytes);
        }
    }

    fn note_eviction(&self, eviction: Eviction, ceiling: u64) {
        if eviction.count == 0 {
            return;
        }
        warn!(
            "STORE | Evicted {} pending records ({} bytes) to stay under the {} byte ceiling",
            eviction.count, eviction.bytes, ceiling
        );
        self.counters
            .evicted
            .fetch_add(eviction.count as u64, Ordering::Relaxed);
        emit(
            self.events.as_ref(),
            Event::RecordsEvicted {
                count: eviction.count,
                bytes: eviction.bytes,
            },
        );
    }

    fn publish_usage(&self, total_bytes: u64) {
        self.usage_tx.send_if_modified(|usage| {
            if *usage == total_bytes {
                false
            } else {
                *usage = total_bytes;
                true
            }
        });
    }

    /// Stores `payload` and returns its sequence number.
    ///
    /// Returns `Ok(None)` without storing anything when the store is disabled.
    /// Oldest pending records are evicted as needed to stay under the ceiling.
    pub fn append(&self, payload: impl Into<Vec<u8>>) -> Result<Option<u64>, StoreError> {
        let config = self.provider.current();
        if !config.enabled {
            debug!("STORE | Disabled, dropping append");
            return Ok(None);
        }

        let payload = payload.into();
        let size = payload.len() as u64;
        let mut inner = self.lock();
        self.sync_ceiling(&mut inner, &config);

        let ceiling = inner.max_bytes.min(MAX_PAYLOAD_BYTES as u64);
        if size > ceiling {
            warn!("STORE | Rejecting payload of {size} bytes, the ceiling is {ceiling} bytes");
            self.counters.oversize.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Oversize { size, ceiling });
        }

        let needed = (inner.total_bytes + size).saturating_sub(inner.max_bytes);
        let (evict, freed) = inner.eviction_candidates(needed);
        if freed < needed {
            warn!(
                "STORE | Storage full, {needed} bytes needed but only in-flight records can make room"
            );
            self.counters.storage_full.fetch_add(1, Ordering::Relaxed);
            emit(self.events.as_ref(), Event::StorageFull { needed });
            return Err(StoreError::StorageFull {
                needed,
                ceiling: inner.max_bytes,
            });
        }

        let record = Record::new(inner.next_sequence, payload);
        if inner.journal.is_some() {
            let mut frames = Vec::with_capacity(
                evict.len() * codec::tombstone_len() + codec::encoded_len(&record),
            );
            for sequence in &evict {
                codec::encode_tombstone_into(*sequence, &mut frames);
            }
            codec::encode_record_into(&record, &mut frames);
            if let Err(e) = inner.write_frames(&frames) {
                error!("STORE | Failed to journal record {}: {}", record.sequence, e);
                return Err(StoreError::Io(e));
            }
        }

        let bytes = inner.remove(&evict);
        let sequence = record.sequence;
        inner.total_bytes += size;
        inner.records.push_back(record);
        inner.next_sequence += 1;
        self.counters.appended.fetch_add(1, Ordering::Relaxed);
        self.note_eviction(
            Eviction {
                count: evict.len(),
                bytes,
            },
            inner.max_bytes,
        );
        if !evict.is_empty() {
            inner.maybe_compact();
        }
        self.publish_usage(inner.total_bytes);
        Ok(Some(sequence))
    }

    /// Selects the contiguous run of pending records at the front of the
    /// queue, within `max_count` records and `max_bytes` payload bytes, and
    /// marks them in flight.
    ///
    /// A head record larger than `max_bytes` is selected on its own.
    pub fn peek_batch(&self, max_count: usize, max_bytes: u64) -> Option<Batch> {
        if max_count == 0 {
            return None;
        }
        let config = self.provider.current();
        let mut inner = self.lock();
        self.sync_ceiling(&mut inner, &config);

        let start = inner
            .records
            .iter()
            .position(|r| r.state == DeliveryState::Pending)?;

        let mut entries = Vec::new();
        let mut size = 0u64;
        for record in inner.records.range_mut(start..) {
            if record.state != DeliveryState::Pending || entries.len() >= max_count {
                break;
            }
            if !entries.is_empty() && size + record.size() > max_bytes {
                break;
            }
            record.state = DeliveryState::InFlight;
            size += record.size();
            entries.push(BatchEntry {
                sequence: record.sequence,
                timestamp_ms: record.timestamp_ms,
                payload: record.payload.clone(),
            });
        }

        debug!(
            "STORE | Selected batch of {} records ({} bytes)",
            entries.len(),
            size
        );
        Some(Batch::new(entries))
    }

    /// Removes the batch's records after successful delivery.
    ///
    /// Returns how many records were removed.
    pub fn acknowledge(&self, batch: &Batch) -> usize {
        let removed = self.purge_in_flight(batch);
        self.counters
            .delivered
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drops the batch's records after a permanent failure.
    ///
    /// Returns how many records were dropped.
    pub fn fail(&self, batch: &Batch) -> usize {
        let removed = self.purge_in_flight(batch);
        self.counters
            .failed
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn purge_in_flight(&self, batch: &Batch) -> usize {
        let sorted = batch.sorted_sequences();
        let mut inner = self.lock();
        let matching = inner.matching(&sorted, DeliveryState::InFlight);
        if matching.is_empty() {
            return 0;
        }
        inner.tombstone(&matching);
        inner.remove(&matching);
        inner.maybe_compact();
        self.publish_usage(inner.total_bytes);
        matching.len()
    }

    /// Returns the batch's records that are still stored to pending, then
    /// re-applies the ceiling.
    ///
    /// Returns how many records were released.
    pub fn release(&self, batch: &Batch) -> usize {
        let sorted = batch.sorted_sequences();
        let config = self.provider.current();
        let mut inner = self.lock();

        let mut released = 0;
        for record in &mut inner.records {
            if record.state == DeliveryState::InFlight
                && sorted.binary_search(&record.sequence).is_ok()
            {
                record.state = DeliveryState::Pending;
                released += 1;
            }
        }

        inner.max_bytes = config.max_storage_bytes;
        let eviction = inner.enforce_ceiling();
        self.note_eviction(eviction, inner.max_bytes);
        if eviction.count > 0 {
            inner.maybe_compact();
            self.publish_usage(inner.total_bytes);
        }
        released
    }

    /// Marks the batch's records that are still stored and pending as in
    /// flight again and returns them as a new batch.
    ///
    /// Records evicted since the batch was released drop out; `None` means
    /// none are left.
    pub fn reacquire(&self, batch: &Batch) -> Option<Batch> {
        let sorted = batch.sorted_sequences();
        let mut inner = self.lock();

        let mut entries = Vec::new();
        for record in &mut inner.records {
            if record.state == DeliveryState::Pending
                && sorted.binary_search(&record.sequence).is_ok()
            {
                record.state = DeliveryState::InFlight;
                entries.push(BatchEntry {
                    sequence: record.sequence,
                    timestamp_ms: record.timestamp_ms,
                    payload: record.payload.clone(),
                });
            }
        }

        if entries.is_empty() {
            None
        } else {
            Some(Batch::new(entries))
        }
    }

    /// Applies a new ceiling immediately, evicting oldest pending records as needed.
    pub fn set_max_bytes(&self, max_bytes: u64) {
        self.provider.set_max_storage_bytes(max_bytes);
        self.refresh_config();
    }

    /// Applies the latest published configuration.
    ///
    /// Every operation does this on its own; call it to have a ceiling change
    /// made through settings storage take effect without waiting for one.
    pub fn refresh_config(&self) {
        let config = self.provider.current();
        let mut inner = self.lock();
        self.sync_ceiling(&mut inner, &config);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.provider.set_enabled(enabled);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.provider.current().enabled
    }

    #[must_use]
    pub fn current_config(&self) -> Arc<ConfigSnapshot> {
        self.provider.current()
    }

    /// Sum of the sizes of all stored records, in-flight ones included.
    #[must_use]
    pub fn current_storage_usage_bytes(&self) -> u64 {
        let config = self.provider.current();
        let mut inner = self.lock();
        self.sync_ceiling(&mut inner, &config);
        inner.total_bytes
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending_count()
    }

    /// Number of stored records, pending and in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// On-disk size of the journal; zero for an in-memory store.
    #[must_use]
    pub fn journal_size_bytes(&self) -> u64 {
        self.lock().journal.as_ref().map_or(0, Journal::len)
    }

    /// Receiver notified whenever the storage usage changes.
    #[must_use]
    pub fn subscribe_usage(&self) -> watch::Receiver<u64> {
        self.usage_tx.subscribe()
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            appended: self.counters.appended.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            oversize: self.counters.oversize.load(Ordering::Relaxed),
            storage_full: self.counters.storage_full.load(Ordering::Relaxed),
            corrupt_frames: self.counters.corrupt_frames.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn states(&self) -> Vec<(u64, DeliveryState)> {
        self.lock()
            .records
            .iter()
            .map(|r| (r.sequence, r.state))
            .collect()
    }
}
