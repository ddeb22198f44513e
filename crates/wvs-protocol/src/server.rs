// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC server side of the executor protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{Endpoint, Incoming, RecvStream, SendStream, ServerConfig, TransportConfig};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::frame::{Frame, FrameError, read_frame, write_frame};

/// Errors in the QUIC server.
#[derive(Debug, Error)]
pub enum RpcServerError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("TLS error: {0}")]
    Tls(String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// TLS certificate chain (PEM).
    pub cert_pem: Vec<u8>,
    /// TLS private key (PEM).
    pub key_pem: Vec<u8>,
    /// Maximum concurrent bidirectional streams per connection.
    pub max_bi_streams: u32,
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: u64,
    /// Keep-alive interval in milliseconds (0 to disable).
    pub keep_alive_interval_ms: u64,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7070".parse().unwrap(),
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            max_bi_streams: 256,
            idle_timeout_ms: 120_000,
            keep_alive_interval_ms: 15_000,
        }
    }
}

/// QUIC server accepting executor protocol connections.
pub struct RpcServer {
    endpoint: Endpoint,
}

impl RpcServer {
    /// Bind with the given configuration.
    pub fn new(config: RpcServerConfig) -> Result<Self, RpcServerError> {
        let server_config = build_server_config(&config)?;
        let endpoint = Endpoint::server(server_config, config.bind_addr)?;

        info!(
            addr = %config.bind_addr,
            max_bi_streams = config.max_bi_streams,
            idle_timeout_ms = config.idle_timeout_ms,
            "QUIC server bound"
        );

        Ok(Self { endpoint })
    }

    /// Bind with a freshly generated self-signed certificate.
    ///
    /// For deployments where the worker dials with certificate
    /// verification disabled; pair with [`crate::RpcClientConfig`]'s
    /// `dangerous_skip_cert_verification`.
    pub fn localhost(bind_addr: SocketAddr) -> Result<Self, RpcServerError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| RpcServerError::Tls(e.to_string()))?;

        let config = RpcServerConfig {
            bind_addr,
            cert_pem: cert.cert.pem().into_bytes(),
            key_pem: cert.key_pair.serialize_pem().into_bytes(),
            ..Default::default()
        };
        Self::new(config)
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<SocketAddr, RpcServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Stop accepting and close existing connections.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"server closing");
    }

    /// Accept connections until the endpoint closes, spawning `handler`
    /// per connection.
    pub async fn run<H, Fut>(&self, handler: H) -> Result<(), RpcServerError>
    where
        H: Fn(ConnectionHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        info!("QUIC server running");

        while let Some(incoming) = self.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                match incoming.await {
                    Ok(connection) => {
                        debug!(remote = %connection.remote_address(), "accepted connection");
                        handler(ConnectionHandler::new(connection)).await;
                    }
                    Err(e) => {
                        warn!("failed to accept connection: {}", e);
                    }
                }
            });
        }

        Ok(())
    }
}

fn build_server_config(config: &RpcServerConfig) -> Result<ServerConfig, RpcServerError> {
    let certs = rustls_pemfile::certs(&mut config.cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RpcServerError::Tls(format!("failed to parse certificates: {}", e)))?;

    let key = rustls_pemfile::private_key(&mut config.key_pem.as_slice())
        .map_err(|e| RpcServerError::Tls(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| RpcServerError::Tls("no private key found".to_string()))?;

    let crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RpcServerError::Tls(e.to_string()))?;

    let mut transport = TransportConfig::default();
    transport.max_idle_timeout(Some(
        std::time::Duration::from_millis(config.idle_timeout_ms)
            .try_into()
            .map_err(|_| RpcServerError::Tls("idle timeout out of range".to_string()))?,
    ));
    transport.max_concurrent_bidi_streams(config.max_bi_streams.into());
    if config.keep_alive_interval_ms > 0 {
        transport.keep_alive_interval(Some(std::time::Duration::from_millis(
            config.keep_alive_interval_ms,
        )));
    }

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
            .map_err(|e| RpcServerError::Tls(e.to_string()))?,
    ));
    server_config.transport_config(Arc::new(transport));

    Ok(server_config)
}

/// One accepted QUIC connection.
pub struct ConnectionHandler {
    connection: quinn::Connection,
}

impl ConnectionHandler {
    /// Wrap an established connection.
    pub fn new(connection: quinn::Connection) -> Self {
        Self { connection }
    }

    /// Remote peer address.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Accept streams until the connection closes, spawning `handler`
    /// per stream.
    pub async fn run<H, Fut>(&self, handler: H)
    where
        H: Fn(StreamHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.connection.accept_bi().await {
                Ok((send, recv)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler(StreamHandler::new(send, recv)).await;
                    });
                }
                Err(
                    quinn::ConnectionError::ApplicationClosed(_)
                    | quinn::ConnectionError::LocallyClosed,
                ) => {
                    debug!("connection closed");
                    break;
                }
                Err(e) => {
                    error!("error accepting stream: {}", e);
                    break;
                }
            }
        }
    }
}

/// One bidirectional stream carrying a single RPC.
pub struct StreamHandler {
    send: SendStream,
    recv: RecvStream,
}

impl StreamHandler {
    /// Wrap a stream pair.
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }

    /// Read the next frame.
    pub async fn read_frame(&mut self) -> Result<Frame, RpcServerError> {
        Ok(read_frame(&mut self.recv).await?)
    }

    /// Write a frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), RpcServerError> {
        Ok(write_frame(&mut self.send, frame).await?)
    }

    /// Finish the send side.
    pub fn finish(&mut self) -> Result<(), RpcServerError> {
        self.send
            .finish()
            .map_err(|e| RpcServerError::Frame(FrameError::Io(std::io::Error::other(e))))
    }

    /// Serve one request/response exchange.
    pub async fn handle_request<Req, Resp, H, Fut>(
        &mut self,
        handler: H,
    ) -> Result<(), RpcServerError>
    where
        Req: prost::Message + Default,
        Resp: prost::Message,
        H: FnOnce(Req) -> Fut,
        Fut: std::future::Future<Output = Resp>,
    {
        let request_frame = self.read_frame().await?;
        let request: Req = request_frame.decode()?;

        let response = handler(request).await;
        self.write_frame(&Frame::response(&response)?).await?;
        self.finish()?;
        Ok(())
    }
}
