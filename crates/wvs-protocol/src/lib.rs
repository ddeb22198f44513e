// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WVS Protocol - QUIC + Protobuf wire layer
//!
//! The wire protocol between the worker and the executor. One
//! bidirectional QUIC stream carries one unary `ExecuteTask` call: a
//! framed request, a framed response, stream finished.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                wvs-protocol                 │
//! ├─────────────────────────────────────────────┤
//! │  RPC: one request/response per stream       │
//! ├─────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost)            │
//! ├─────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn, rustls)            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use wvs_protocol::{RpcClient, executor_proto};
//!
//! let client = RpcClient::localhost("127.0.0.1:7070".parse()?)?;
//! let request = executor_proto::ExecuteTaskRequest {
//!     task_id: "t1".into(),
//!     wsid: "w1".into(),
//!     op: executor_proto::TaskOp::InitWorkspace.into(),
//!     params: Default::default(),
//! };
//! let response: executor_proto::ExecuteTaskResponse = client.request(&request).await?;
//! ```

pub mod client;
pub mod frame;
pub mod server;

/// Generated protobuf types for the executor protocol.
pub mod executor_proto {
    include!(concat!(env!("OUT_DIR"), "/wvs.executor.rs"));
}

pub use client::{RpcClient, RpcClientConfig, RpcClientError};
pub use frame::{Frame, FrameError, MessageType};
pub use server::{ConnectionHandler, RpcServer, RpcServerConfig, RpcServerError, StreamHandler};
