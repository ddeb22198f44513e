// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC client side of the executor protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, TransportConfig};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::frame::{Frame, FrameError, MessageType, read_frame, write_frame};

/// Errors in the QUIC client.
#[derive(Debug, Error)]
pub enum RpcClientError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no connection established")]
    NotConnected,

    #[error("connection timed out after {0}ms")]
    Timeout(u64),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Executor address to dial.
    pub server_addr: SocketAddr,
    /// TLS server name.
    pub server_name: String,
    /// Accept any server certificate. Required when the executor runs
    /// with a self-signed certificate.
    pub dangerous_skip_cert_verification: bool,
    /// Keep-alive interval in milliseconds (0 to disable).
    pub keep_alive_interval_ms: u64,
    /// Idle timeout in milliseconds. Clone-heavy tasks can take minutes,
    /// so this is deliberately long.
    pub idle_timeout_ms: u64,
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:7070".parse().unwrap(),
            server_name: "localhost".to_string(),
            dangerous_skip_cert_verification: false,
            keep_alive_interval_ms: 10_000,
            idle_timeout_ms: 600_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// QUIC client dialing one executor.
///
/// The connection is established lazily and reused across requests; a
/// dead connection is re-dialed on the next request.
#[derive(Debug)]
pub struct RpcClient {
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
    config: RpcClientConfig,
}

impl RpcClient {
    /// Create a client with the given configuration.
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcClientError> {
        let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap())?;
        endpoint.set_default_client_config(build_client_config(&config));

        Ok(Self {
            endpoint,
            connection: Mutex::new(None),
            config,
        })
    }

    /// Create a client for a self-signed executor at `addr`.
    pub fn localhost(addr: SocketAddr) -> Result<Self, RpcClientError> {
        Self::new(RpcClientConfig {
            server_addr: addr,
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
    }

    /// Establish (or reuse) the connection.
    pub async fn connect(&self) -> Result<(), RpcClientError> {
        let mut conn_guard = self.connection.lock().await;

        if let Some(ref conn) = *conn_guard
            && conn.close_reason().is_none()
        {
            debug!("reusing existing connection");
            return Ok(());
        }

        info!(addr = %self.config.server_addr, "connecting to executor");

        let connecting = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| RpcClientError::Timeout(self.config.connect_timeout_ms))??;

        *conn_guard = Some(connection);
        Ok(())
    }

    async fn get_connection(&self) -> Result<Connection, RpcClientError> {
        self.connect().await?;
        let conn_guard = self.connection.lock().await;
        conn_guard.clone().ok_or(RpcClientError::NotConnected)
    }

    /// Send one unary request on a fresh stream and await the response.
    pub async fn request<Req: prost::Message, Resp: prost::Message + Default>(
        &self,
        request: &Req,
    ) -> Result<Resp, RpcClientError> {
        let conn = self.get_connection().await?;
        let (mut send, mut recv) = conn.open_bi().await?;

        write_frame(&mut send, &Frame::request(request)?).await?;
        send.finish()
            .map_err(|e| RpcClientError::Io(std::io::Error::other(e)))?;

        let response_frame = read_frame(&mut recv).await?;
        match response_frame.message_type {
            MessageType::Response => Ok(response_frame.decode()?),
            MessageType::Error => Err(RpcClientError::Frame(FrameError::PeerError)),
            MessageType::Request => Err(RpcClientError::Frame(FrameError::Io(
                std::io::Error::new(std::io::ErrorKind::InvalidData, "unexpected message type"),
            ))),
        }
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut conn_guard = self.connection.lock().await;
        if let Some(conn) = conn_guard.take() {
            conn.close(0u32.into(), b"client closing");
        }
    }

    /// Whether a live connection is held.
    pub async fn is_connected(&self) -> bool {
        let conn_guard = self.connection.lock().await;
        match *conn_guard {
            Some(ref conn) => conn.close_reason().is_none(),
            None => false,
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.connection.try_lock()
            && let Some(conn) = guard.take()
        {
            conn.close(0u32.into(), b"client dropped");
        }
    }
}

fn build_client_config(config: &RpcClientConfig) -> ClientConfig {
    let crypto = if config.dangerous_skip_cert_verification {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    let mut transport = TransportConfig::default();
    if config.keep_alive_interval_ms > 0 {
        transport.keep_alive_interval(Some(Duration::from_millis(config.keep_alive_interval_ms)));
    }
    transport.max_idle_timeout(Some(
        Duration::from_millis(config.idle_timeout_ms)
            .try_into()
            .expect("idle timeout out of range"),
    ));

    let mut client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .expect("rustls config incompatible with quinn"),
    ));
    client_config.transport_config(Arc::new(transport));
    client_config
}

/// Certificate verifier that accepts anything. Self-signed executors only.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RpcClientConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:7070".parse().unwrap());
        assert_eq!(config.server_name, "localhost");
        assert!(!config.dangerous_skip_cert_verification);
    }

    #[tokio::test]
    async fn client_creation() {
        let client = RpcClient::localhost("127.0.0.1:7070".parse().unwrap());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn initial_state_is_disconnected() {
        let client = RpcClient::localhost("127.0.0.1:7070".parse().unwrap()).unwrap();
        assert!(!client.is_connected().await);
        client.close().await;
    }

    #[tokio::test]
    async fn connect_to_nothing_times_out() {
        let client = RpcClient::new(RpcClientConfig {
            server_addr: "127.0.0.1:59999".parse().unwrap(),
            dangerous_skip_cert_verification: true,
            connect_timeout_ms: 100,
            ..Default::default()
        })
        .unwrap();
        assert!(client.connect().await.is_err());
    }
}
