// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WVS Executor binary.
//!
//! Serves `ExecuteTask` RPCs over QUIC and performs the filesystem side
//! of every workspace operation. Stateless: all durable state lives in
//! the queue layer and on the shared mount.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use wvs_executor::Config;
use wvs_executor::server;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wvs_executor=info".parse().unwrap()),
        )
        .init();

    info!("Starting WVS Executor");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        addr = %config.bind_addr,
        mount = %config.mount_path.display(),
        quiesce_timeout = ?config.quiesce_timeout,
        task_timeout = ?config.task_timeout,
        clone_mode = ?config.clone_mode,
        "Configuration loaded"
    );

    let bind_addr = config.bind_addr;
    let config = Arc::new(config);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(bind_addr, config).await {
            error!("Executor QUIC server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
