// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WVS Worker binary.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use wvs_store::{PostgresStore, migrations};
use wvs_worker::{Config, RemoteExecutor, Worker};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wvs_worker=info".parse().unwrap()),
        )
        .init();

    info!("Starting WVS Worker");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        executors = ?config.executor_addrs,
        poll_interval = ?config.poll_interval,
        idle_backoff = ?config.idle_backoff,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let store = PostgresStore::connect(&config.db_dsn).await?;
    info!("Database connection established");

    info!("Running database migrations...");
    migrations::run_postgres(store.pool()).await?;
    info!("Migrations completed");

    let executor = Arc::new(RemoteExecutor::new(&config.executor_addrs)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_timeout = config.shutdown_timeout;

    let worker = Worker::new(Arc::new(store), executor, config);
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    let _ = shutdown_tx.send(true);

    // Give the in-flight task its grace period, then cut it loose; the
    // lease sweeper on another worker will pick up anything stranded.
    if tokio::time::timeout(shutdown_timeout, worker_handle)
        .await
        .is_err()
    {
        warn!("worker did not stop within the grace period");
    }

    info!("Shutdown complete");
    Ok(())
}
