//! Server container binding contract
//!
//! [`ServerTlsBinding`] is everything a server container needs to terminate
//! mutual TLS: the certificate source, the trust source, the client-auth flag,
//! the enabled protocols and the request gate. A [`ContainerBindingAdapter`]
//! translates it into one container's native TLS configuration.

use crate::error::Result;
use crate::security::auth::RevocationCheckingGate;
use crate::security::tls::SharedTrustAuthority;

use rustls::{Certificate, PrivateKey, ServerConfig};
use std::sync::Arc;

/// Key material, trust anchors and gate for an inbound server, always read
/// from the authority currently in effect.
#[derive(Clone, Debug)]
pub struct ServerTlsBinding {
    authority: Arc<SharedTrustAuthority>,
    gate: RevocationCheckingGate,
}

impl ServerTlsBinding {
    pub fn new(authority: Arc<SharedTrustAuthority>, gate: RevocationCheckingGate) -> Self {
        Self { authority, gate }
    }

    pub fn certificate_chain(&self) -> Vec<Certificate> {
        self.authority
            .current()
            .key_material()
            .certificate_chain()
            .to_vec()
    }

    pub fn private_key(&self) -> PrivateKey {
        self.authority.current().key_material().private_key().clone()
    }

    pub fn trust_anchors(&self) -> Vec<Certificate> {
        self.authority
            .current()
            .trust_anchors()
            .certificates()
            .to_vec()
    }

    pub fn client_auth_required(&self) -> bool {
        self.authority.current().client_auth_required()
    }

    pub fn protocols(&self) -> Vec<String> {
        self.authority.current().protocols().to_vec()
    }

    /// rustls server configuration of the current authority. Connections
    /// accepted after a rotation pick up the new one.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        self.authority.current().context().server_config.clone()
    }

    pub fn gate(&self) -> &RevocationCheckingGate {
        &self.gate
    }

    pub fn authority(&self) -> &Arc<SharedTrustAuthority> {
        &self.authority
    }
}

/// Installs a [`ServerTlsBinding`] into a specific server container.
pub trait ContainerBindingAdapter {
    type Server;

    fn bind(&self, binding: ServerTlsBinding) -> Result<Self::Server>;
}
