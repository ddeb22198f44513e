// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC server and op dispatch.
//!
//! One stream carries one `ExecuteTask` call. Op-level failures come
//! back as `success = false` with an error code; transport errors are
//! the stream's problem.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, instrument};

use wvs_protocol::executor_proto::{ExecuteTaskRequest, ExecuteTaskResponse, TaskOp};
use wvs_protocol::frame::Frame;
use wvs_protocol::server::{ConnectionHandler, RpcServer, StreamHandler};

use crate::config::Config;
use crate::{init_workspace, set_current, snapshot_create, snapshot_drop};

/// Run the executor QUIC server until the endpoint closes.
#[instrument(skip(config), fields(addr = %bind_addr))]
pub async fn run_server(bind_addr: SocketAddr, config: Arc<Config>) -> Result<()> {
    let server = RpcServer::localhost(bind_addr)?;

    info!("executor QUIC server starting");

    server
        .run(move |conn: ConnectionHandler| {
            let config = config.clone();
            async move {
                handle_connection(conn, config).await;
            }
        })
        .await?;

    Ok(())
}

/// Handle one worker connection.
pub async fn handle_connection(conn: ConnectionHandler, config: Arc<Config>) {
    debug!(remote = %conn.remote_address(), "worker connection accepted");

    conn.run(move |mut stream: StreamHandler| {
        let config = config.clone();
        async move {
            if let Err(e) = handle_stream(&mut stream, &config).await {
                error!("stream error: {}", e);
            }
        }
    })
    .await;

    debug!("worker connection closed");
}

async fn handle_stream(
    stream: &mut StreamHandler,
    config: &Config,
) -> Result<(), wvs_protocol::RpcServerError> {
    let request_frame = stream.read_frame().await?;
    let request: ExecuteTaskRequest = request_frame.decode()?;

    let response = execute(config, request).await;

    stream.write_frame(&Frame::response(&response)?).await?;
    stream.finish()?;
    Ok(())
}

/// Execute one task attempt and map the outcome onto the wire response.
#[instrument(skip(config, request), fields(task_id = %request.task_id, wsid = %request.wsid))]
pub async fn execute(config: &Config, request: ExecuteTaskRequest) -> ExecuteTaskResponse {
    let op = match TaskOp::try_from(request.op) {
        Ok(TaskOp::Unspecified) | Err(_) => {
            return failure("UNKNOWN_OP", format!("unknown op: {}", request.op));
        }
        Ok(op) => op,
    };

    info!(op = ?op, "executor: task received");

    // Params arrive as the submitter wrote them; the worker adds task_id.
    let mut params = request.params;
    params
        .entry("task_id".to_string())
        .or_insert_with(|| request.task_id.clone());

    let outcome = tokio::time::timeout(
        config.task_timeout,
        dispatch(config, op, &request.wsid, &params),
    )
    .await;

    match outcome {
        Ok(Ok(results)) => {
            info!(op = ?op, "executor: task succeeded");
            ExecuteTaskResponse {
                success: true,
                results,
                error_code: String::new(),
                error_message: String::new(),
            }
        }
        Ok(Err(e)) => {
            error!(op = ?op, error = %e, "executor: task failed");
            failure(e.error_code(), e.to_string())
        }
        // The op future was dropped at an await point; any held
        // ResumeGuard has already written REQUEST_RESUME.
        Err(_) => {
            error!(op = ?op, timeout = ?config.task_timeout, "executor: task deadline exceeded");
            failure(
                "EXECUTOR_ERROR",
                format!("op deadline exceeded after {:?}", config.task_timeout),
            )
        }
    }
}

async fn dispatch(
    config: &Config,
    op: TaskOp,
    wsid: &str,
    params: &HashMap<String, String>,
) -> Result<HashMap<String, String>, crate::ExecutorError> {
    match op {
        TaskOp::InitWorkspace => init_workspace::run(config, wsid, params).await,
        TaskOp::SnapshotCreate => snapshot_create::run(config, wsid, params).await,
        TaskOp::SnapshotDrop => snapshot_drop::run(config, wsid, params).await,
        TaskOp::SetCurrent => set_current::run(config, wsid, params).await,
        TaskOp::Unspecified => unreachable!("filtered by the caller"),
    }
}

fn failure(code: &str, message: String) -> ExecuteTaskResponse {
    ExecuteTaskResponse {
        success: false,
        results: HashMap::new(),
        error_code: code.to_string(),
        error_message: message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unspecified_op_is_unknown() {
        let config = Config::default();
        let response = execute(
            &config,
            ExecuteTaskRequest {
                task_id: "t1".into(),
                wsid: "w1".into(),
                op: TaskOp::Unspecified.into(),
                params: HashMap::new(),
            },
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.error_code, "UNKNOWN_OP");
    }

    #[tokio::test]
    async fn out_of_range_op_is_unknown() {
        let config = Config::default();
        let response = execute(
            &config,
            ExecuteTaskRequest {
                task_id: "t1".into(),
                wsid: "w1".into(),
                op: 99,
                params: HashMap::new(),
            },
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.error_code, "UNKNOWN_OP");
    }
}
