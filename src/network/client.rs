//! Outbound mutual TLS HTTP client
//!
//! Presents this party's identity and verifies the server with the same
//! revocation-aware trust manager the inbound side uses.

use crate::error::{Result, TrustError};
use crate::security::tls::TlsContext;

use bytes::Bytes;
use hyper::client::conn::{self, SendRequest};
use hyper::{header, Body, Method, Request, Response, StatusCode};
use rustls::ServerName;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

#[derive(Clone)]
pub struct OutboundTlsClient {
    connector: TlsConnector,
}

impl OutboundTlsClient {
    pub fn new(context: &TlsContext) -> Self {
        Self {
            connector: TlsConnector::from(context.client_config.clone()),
        }
    }

    /// Open one mutual TLS connection to `addr`, verifying the server as
    /// `server_name`.
    pub async fn connect(&self, addr: SocketAddr, server_name: &str) -> Result<ClientSession> {
        let name = ServerName::try_from(server_name).map_err(|_| {
            TrustError::Network(format!("invalid server name '{}'", server_name))
        })?;

        let tcp = TcpStream::connect(addr).await?;
        let tls = self
            .connector
            .connect(name, tcp)
            .await
            .map_err(|e| TrustError::HandshakeRejected {
                reason: e.to_string(),
            })?;

        let (sender, connection) = conn::handshake(tls)
            .await
            .map_err(|e| TrustError::Network(format!("HTTP handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Outbound connection closed with error");
            }
        });

        Ok(ClientSession {
            sender,
            host: server_name.to_string(),
        })
    }
}

impl std::fmt::Debug for OutboundTlsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundTlsClient").finish()
    }
}

/// HTTP/1.1 requests over one established connection.
pub struct ClientSession {
    sender: SendRequest<Body>,
    host: String,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession").field("host", &self.host).finish()
    }
}

impl ClientSession {
    pub async fn get(&mut self, path: &str) -> Result<(StatusCode, Bytes)> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::HOST, self.host.as_str())
            .body(Body::empty())
            .map_err(|e| TrustError::Network(format!("invalid request: {}", e)))?;

        let response = self.send(request).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| TrustError::Network(format!("failed to read response body: {}", e)))?;

        Ok((status, body))
    }

    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Body>> {
        std::future::poll_fn(|cx| self.sender.poll_ready(cx))
            .await
            .map_err(|e| TrustError::Network(format!("connection unavailable: {}", e)))?;

        self.sender
            .send_request(request)
            .await
            .map_err(|e| TrustError::Network(format!("request failed: {}", e)))
    }
}
