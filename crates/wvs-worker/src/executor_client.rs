// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor call seam.
//!
//! The worker talks to executors through [`TaskExecutor`] so the loop
//! can be tested against a scripted mock; [`RemoteExecutor`] is the real
//! QUIC implementation, round-robining across the configured addresses.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use wvs_protocol::RpcClient;
use wvs_protocol::executor_proto::{ExecuteTaskRequest, ExecuteTaskResponse};

/// Failures of the call itself, as opposed to op-level failures the
/// executor reports inside a response.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorCallError {
    /// Transport-level failure.
    #[error("executor transport: {0}")]
    Transport(#[from] wvs_protocol::RpcClientError),

    /// The per-task deadline expired before a response arrived.
    #[error("executor call timed out after {0:?}")]
    Deadline(Duration),

    /// The address list could not be parsed.
    #[error("invalid executor address '{0}'")]
    BadAddress(String),
}

/// One unary call to an executor.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Issue `ExecuteTask` under the given deadline.
    async fn execute(
        &self,
        request: ExecuteTaskRequest,
        deadline: Duration,
    ) -> Result<ExecuteTaskResponse, ExecutorCallError>;
}

/// QUIC client pool over the configured executor addresses.
#[derive(Debug)]
pub struct RemoteExecutor {
    clients: Vec<RpcClient>,
    next: AtomicUsize,
}

impl RemoteExecutor {
    /// Dial clients for every address (lazily connected on first use).
    ///
    /// Executors serve self-signed certificates, so verification is
    /// skipped; the deployment boundary is the private network.
    pub fn new(addrs: &[String]) -> Result<Self, ExecutorCallError> {
        let mut clients = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let socket_addr: SocketAddr = addr
                .parse()
                .map_err(|_| ExecutorCallError::BadAddress(addr.clone()))?;
            clients.push(RpcClient::localhost(socket_addr)?);
        }
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TaskExecutor for RemoteExecutor {
    async fn execute(
        &self,
        request: ExecuteTaskRequest,
        deadline: Duration,
    ) -> Result<ExecuteTaskResponse, ExecutorCallError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        let client = &self.clients[index];

        tokio::time::timeout(deadline, client.request(&request))
            .await
            .map_err(|_| ExecutorCallError::Deadline(deadline))?
            .map_err(ExecutorCallError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_address_is_rejected() {
        let err = RemoteExecutor::new(&["not-an-addr".to_string()]).unwrap_err();
        assert!(matches!(err, ExecutorCallError::BadAddress(_)));
    }

    #[tokio::test]
    async fn valid_addresses_build_a_pool() {
        let pool = RemoteExecutor::new(&[
            "127.0.0.1:7070".to_string(),
            "127.0.0.1:7071".to_string(),
        ])
        .unwrap();
        assert_eq!(pool.clients.len(), 2);
    }
}
