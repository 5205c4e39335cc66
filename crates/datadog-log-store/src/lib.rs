// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Datadog Log Store
//!
//! A bounded, size-capped persistent store for telemetry log records with an
//! at-least-once delivery pipeline.
//!
//! ## Overview
//!
//! Producers append opaque payloads to a [`store::LogStore`]. Every record is
//! journaled to disk before `append` returns, so pending records survive a crash
//! between append and acknowledgement. When the configured byte ceiling would be
//! exceeded the oldest pending records are evicted first.
//!
//! A single [`worker::DeliveryWorker`] drives the [`batcher::Batcher`] and the
//! [`pipeline::DeliveryPipeline`]: batches are handed to a [`transport::Transport`],
//! acknowledged on success, released and retried with exponential backoff on
//! transient failure, and dropped on permanent failure.
//!
//! ```text
//!   append ──> LogStore (journal, ceiling) ──> Batcher ──> Pipeline ──> Transport
//!                  ^                                          │
//!                  └──── acknowledge / release / fail ────────┘
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: self-delimiting, checksummed binary frames
//! - [`record`]: the record and delivery state model
//! - [`store`]: the bounded store and its journal
//! - [`batcher`]: interval-gated batch selection
//! - [`pipeline`]: transport calls, retry and backoff
//! - [`worker`]: background delivery loop with cancellation
//! - [`config`]: static configuration, snapshots and settings storage
//! - [`event_bus`]: delivery and eviction events for observers
//! - [`logger`]: tracing formatter and subscriber setup

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![allow(clippy::module_name_repetitions)]

/// Interval-gated batch selection
pub mod batcher;

/// Binary encoding of records and journal tombstones
pub mod codec;

/// Configuration loading, runtime snapshots and settings storage
pub mod config;

/// Event bus for delivery and eviction notifications
pub mod event_bus;

mod journal;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Transport calls with retry and backoff
pub mod pipeline;

/// Record model
pub mod record;

/// Bounded persistent log store
pub mod store;

/// Transport interface consumed by the pipeline
pub mod transport;

/// Background delivery worker
pub mod worker;

pub use config::{ConfigProvider, ConfigSnapshot};
pub use record::{DeliveryState, Record};
pub use store::{Batch, LogStore, StoreError};
pub use transport::{Transport, TransportRequest, TransportResult};
