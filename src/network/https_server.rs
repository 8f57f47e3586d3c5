//! HTTPS server adapter on hyper and tokio-rustls
//!
//! Accepts TCP connections, performs the TLS handshake with the current
//! authority's server configuration and runs every request through the
//! revocation gate before the application handler sees it.

use super::binding::{ContainerBindingAdapter, ServerTlsBinding};
use crate::error::{Result, TrustError};
use crate::security::auth::{GateDecision, RevocationCheckingGate};

use async_trait::async_trait;
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{header, Body, Request, Response, StatusCode};
use rustls::Certificate;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Application logic behind the gate.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request<Body>) -> Response<Body>;
}

/// Binds the listening socket for a [`ServerTlsBinding`].
#[derive(Debug, Clone, Copy)]
pub struct HyperTlsAdapter {
    listen: SocketAddr,
}

impl HyperTlsAdapter {
    pub fn new(listen: SocketAddr) -> Self {
        Self { listen }
    }
}

impl ContainerBindingAdapter for HyperTlsAdapter {
    type Server = HttpsServer;

    fn bind(&self, binding: ServerTlsBinding) -> Result<HttpsServer> {
        let listener = std::net::TcpListener::bind(self.listen)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!(
            %local_addr,
            client_auth_required = binding.client_auth_required(),
            protocols = ?binding.protocols(),
            "HTTPS listener bound"
        );

        Ok(HttpsServer {
            listener,
            local_addr,
            binding,
        })
    }
}

/// A bound, not yet serving, HTTPS server.
#[derive(Debug)]
pub struct HttpsServer {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    binding: ServerTlsBinding,
}

impl HttpsServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self, handler: Arc<dyn RequestHandler>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::from_std(self.listener)?;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(local_addr = %self.local_addr, "HTTPS server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let acceptor = TlsAcceptor::from(self.binding.server_config());
                    let gate = self.binding.gate().clone();
                    let metrics = self.binding.authority().current().metrics().clone();
                    let handler = handler.clone();

                    tokio::spawn(async move {
                        metrics.record_connection_established();
                        if let Err(e) = serve_connection(stream, peer_addr, acceptor, gate, handler).await {
                            debug!(peer = %peer_addr, error = %e, "Connection ended with error");
                        }
                        metrics.record_connection_closed();
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    gate: RevocationCheckingGate,
    handler: Arc<dyn RequestHandler>,
) -> Result<()> {
    let tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            // The peer only ever sees a generic alert
            debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
            return Ok(());
        }
    };

    let peer_chain: Option<Arc<Vec<Certificate>>> = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(|chain| Arc::new(chain.to_vec()));

    debug!(
        peer = %peer_addr,
        client_certificate = peer_chain.is_some(),
        "TLS connection established"
    );

    let service = service_fn(move |request: Request<Body>| {
        let gate = gate.clone();
        let handler = handler.clone();
        let peer_chain = peer_chain.clone();
        async move {
            let response = match gate.check_chain(peer_chain.as_deref().map(Vec::as_slice)) {
                GateDecision::Allow => handler.handle(request).await,
                GateDecision::Deny(_) => forbidden(),
            };
            Ok::<_, Infallible>(response)
        }
    });

    Http::new()
        .http1_only(true)
        .serve_connection(tls, service)
        .await
        .map_err(|e| TrustError::Network(e.to_string()))
}

/// Identical for every denial reason.
fn forbidden() -> Response<Body> {
    let mut response = Response::new(Body::from("Forbidden"));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/plain"));
    response
}
