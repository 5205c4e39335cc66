// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod spool;

use std::{env, path::PathBuf, process, sync::Arc};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};

use datadog_log_store::{
    config::{self, Config},
    event_bus::{Event, EventBus},
    logger,
    pipeline::DeliveryPipeline,
    worker::DeliveryWorker,
    ConfigProvider, ConfigSnapshot, LogStore, StoreError,
};

use crate::spool::SpoolTransport;

const SPOOL_DIR_NAME: &str = "spool";

#[tokio::main]
pub async fn main() {
    let config_dir = env::var("DD_CONFIG_DIR").map_or_else(|_| PathBuf::from("."), PathBuf::from);
    let config = match config::get_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("DD_LOG_STORE | ERROR | Invalid configuration: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = logger::init(config.log_level) {
        eprintln!("DD_LOG_STORE | ERROR | Unable to set up logging: {e}");
    }

    let Some(journal_path) = config.storage_path.clone() else {
        error!("Storage path is not set");
        process::exit(1);
    };

    if let Err(e) = run(&config, journal_path).await {
        error!("Shutting down: {e}");
        process::exit(1);
    }
}

async fn run(config: &Config, journal_path: PathBuf) -> Result<(), StoreError> {
    let spool_dir = journal_path
        .parent()
        .map_or_else(|| PathBuf::from(SPOOL_DIR_NAME), |p| p.join(SPOOL_DIR_NAME));

    let (event_bus, event_tx) = EventBus::run();
    let events = tokio::spawn(log_events(event_bus));

    let provider = ConfigProvider::new(ConfigSnapshot::from(config));
    let store = Arc::new(
        LogStore::open_with_sync(&journal_path, provider.clone(), config.storage_sync)?
            .with_events(event_tx.clone()),
    );
    info!(
        "Opened {} with {} pending records, spooling to {}",
        journal_path.display(),
        store.pending_count(),
        spool_dir.display()
    );

    let transport = Arc::new(SpoolTransport::new(spool_dir));
    let pipeline =
        Arc::new(DeliveryPipeline::new(store.clone(), transport).with_events(event_tx.clone()));
    let worker = DeliveryWorker::new(store.clone(), pipeline, provider);
    let cancel_token = worker.cancel_token();
    let worker_handle = tokio::spawn(worker.run());

    read_stdin(&store).await;

    cancel_token.cancel();
    if let Err(e) = worker_handle.await {
        error!("Delivery worker panicked: {e}");
    }
    shutdown_events(&event_tx).await;
    if let Err(e) = events.await {
        error!("Event consumer panicked: {e}");
    }

    info!(
        "Stopped with {} records pending, {:?}",
        store.pending_count(),
        store.stats()
    );
    Ok(())
}

/// Appends stdin lines until ctrl-c. Reaching the end of stdin keeps the
/// worker running so pending records still go out.
async fn read_stdin(store: &LogStore) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Unable to listen for shutdown signal: {e}");
                }
                debug!("Received shutdown signal");
                return;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => {
                    if let Err(e) = store.append(line) {
                        warn!("Dropping line: {e}");
                    }
                }
                Ok(None) => {
                    debug!("Reached end of input, waiting for shutdown signal");
                    stdin_open = false;
                }
                Err(e) => {
                    error!("Unable to read input: {e}");
                    stdin_open = false;
                }
            },
        }
    }
}

async fn log_events(mut event_bus: EventBus) {
    while let Some(event) = event_bus.rx.recv().await {
        match event {
            Event::RecordsEvicted { count, bytes } => {
                warn!("EVENTS | {count} records ({bytes} bytes) evicted");
            }
            Event::StorageFull { needed } => {
                warn!("EVENTS | Storage full, {needed} bytes needed");
            }
            Event::CorruptFrames { count } => {
                warn!("EVENTS | {count} corrupt journal frames skipped");
            }
            Event::BatchDelivered { count } => debug!("EVENTS | Delivered {count} records"),
            Event::BatchAbandoned { count } => error!("EVENTS | Abandoned {count} records"),
            Event::Tombstone => break,
        }
    }
}

async fn shutdown_events(tx: &Sender<Event>) {
    if let Err(e) = tx.send(Event::Tombstone).await {
        debug!("Event consumer already gone: {e}");
    }
}
