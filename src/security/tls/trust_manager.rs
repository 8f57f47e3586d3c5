//! Revocation-aware trust manager
//!
//! Chain-of-trust validation is delegated to the webpki verifiers rustls ships
//! with. Revocation is layered on top: once a chain verifies, every certificate
//! in it is looked up in the current revocation index, so revoking an
//! intermediate CA denies everything it issued.
//!
//! The same manager is installed as the rustls client and server certificate
//! verifier. During a handshake every rejection is reported to the peer as a
//! generic `handshake_failure` alert; the specific reason is logged and counted
//! locally only.

use super::key_material::TrustAnchorSet;
use super::revocation::{RevocationIndex, SharedRevocationIndex};
use crate::security::metrics::SecurityMetrics;

use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::server::{AllowAnyAuthenticatedClient, ClientCertVerified, ClientCertVerifier};
use rustls::{Certificate, CertificateError, DistinguishedName, Error as TlsError, ServerName};
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, warn};

const GENERIC_REJECTION: &str = "peer certificate rejected";

/// Why a chain was or was not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustReason {
    Valid,
    UntrustedChain,
    Revoked,
    Expired,
}

impl TrustReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustReason::Valid => "valid",
            TrustReason::UntrustedChain => "untrusted_chain",
            TrustReason::Revoked => "revoked",
            TrustReason::Expired => "expired",
        }
    }
}

impl fmt::Display for TrustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one validation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustDecision {
    pub trusted: bool,
    pub reason: TrustReason,
}

impl TrustDecision {
    pub fn valid() -> Self {
        Self {
            trusted: true,
            reason: TrustReason::Valid,
        }
    }

    pub fn rejected(reason: TrustReason) -> Self {
        Self {
            trusted: false,
            reason,
        }
    }
}

/// Composed trust manager: platform chain validation plus revocation lookup.
pub struct RevocationAwareTrustManager {
    client_verifier: AllowAnyAuthenticatedClient,
    server_verifier: WebPkiVerifier,
    root_subjects: Vec<DistinguishedName>,
    revocations: Arc<SharedRevocationIndex>,
    client_auth_required: bool,
    metrics: Arc<SecurityMetrics>,
}

impl RevocationAwareTrustManager {
    pub fn new(
        anchors: &TrustAnchorSet,
        revocations: Arc<SharedRevocationIndex>,
        client_auth_required: bool,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        let roots = anchors.root_store().clone();
        let client_verifier = AllowAnyAuthenticatedClient::new(roots.clone());
        let root_subjects = client_verifier.client_auth_root_subjects().to_vec();

        Self {
            client_verifier,
            server_verifier: WebPkiVerifier::new(roots, None),
            root_subjects,
            revocations,
            client_auth_required,
            metrics,
        }
    }

    /// Validate a peer chain (leaf first) presented as a client identity.
    pub fn validate(&self, chain: &[Certificate]) -> TrustDecision {
        self.validate_at(chain, SystemTime::now())
    }

    pub fn validate_at(&self, chain: &[Certificate], now: SystemTime) -> TrustDecision {
        let (end_entity, intermediates) = match chain.split_first() {
            Some(split) => split,
            None => return TrustDecision::rejected(TrustReason::UntrustedChain),
        };

        if let Err(e) = self
            .client_verifier
            .verify_client_cert(end_entity, intermediates, now)
        {
            return TrustDecision::rejected(classify(&e));
        }

        self.check_revocation(chain)
    }

    /// Revocation lookup only, against a single index snapshot. Chain trust is
    /// assumed to have been established already.
    pub fn check_revocation(&self, chain: &[Certificate]) -> TrustDecision {
        let index = self.revocations.load();
        check_chain_revocation(&index, chain)
    }

    pub fn revocations(&self) -> &Arc<SharedRevocationIndex> {
        &self.revocations
    }

    pub fn client_auth_required(&self) -> bool {
        self.client_auth_required
    }

    fn reject(&self, reason: TrustReason, peer: &Certificate, side: &'static str) -> TlsError {
        match reason {
            TrustReason::Revoked => self.metrics.record_handshake_revoked(),
            TrustReason::Expired => self.metrics.record_handshake_expired(),
            _ => self.metrics.record_handshake_untrusted(),
        }

        let fingerprint = super::certificate::calculate_fingerprint(&peer.0);
        if reason == TrustReason::Revoked {
            warn!(
                side,
                reason = %reason,
                fingerprint = %hex::encode(fingerprint),
                "Rejected revoked peer certificate during handshake"
            );
        } else {
            debug!(
                side,
                reason = %reason,
                fingerprint = %hex::encode(fingerprint),
                "Rejected peer certificate during handshake"
            );
        }

        TlsError::General(GENERIC_REJECTION.to_string())
    }

    fn accept(&self, started: Instant) {
        self.metrics.record_handshake_accepted();
        self.metrics.record_handshake_latency(started.elapsed());
    }
}

pub(crate) fn check_chain_revocation(index: &RevocationIndex, chain: &[Certificate]) -> TrustDecision {
    if chain.iter().any(|certificate| index.is_revoked(certificate)) {
        TrustDecision::rejected(TrustReason::Revoked)
    } else {
        TrustDecision::valid()
    }
}

fn classify(error: &TlsError) -> TrustReason {
    match error {
        TlsError::InvalidCertificate(CertificateError::Expired)
        | TlsError::InvalidCertificate(CertificateError::NotValidYet) => TrustReason::Expired,
        _ => TrustReason::UntrustedChain,
    }
}

fn with_intermediates(end_entity: &Certificate, intermediates: &[Certificate]) -> Vec<Certificate> {
    let mut chain = Vec::with_capacity(intermediates.len() + 1);
    chain.push(end_entity.clone());
    chain.extend_from_slice(intermediates);
    chain
}

impl ClientCertVerifier for RevocationAwareTrustManager {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.client_auth_required
    }

    fn client_auth_root_subjects(&self) -> &[DistinguishedName] {
        &self.root_subjects
    }

    fn verify_client_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        now: SystemTime,
    ) -> Result<ClientCertVerified, TlsError> {
        let started = Instant::now();
        let decision = match self
            .client_verifier
            .verify_client_cert(end_entity, intermediates, now)
        {
            Ok(_) => self.check_revocation(&with_intermediates(end_entity, intermediates)),
            Err(e) => TrustDecision::rejected(classify(&e)),
        };

        if decision.trusted {
            self.accept(started);
            Ok(ClientCertVerified::assertion())
        } else {
            Err(self.reject(decision.reason, end_entity, "client"))
        }
    }
}

impl ServerCertVerifier for RevocationAwareTrustManager {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let started = Instant::now();
        let decision = match self.server_verifier.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            scts,
            ocsp_response,
            now,
        ) {
            Ok(_) => self.check_revocation(&with_intermediates(end_entity, intermediates)),
            Err(e) => TrustDecision::rejected(classify(&e)),
        };

        if decision.trusted {
            self.accept(started);
            Ok(ServerCertVerified::assertion())
        } else {
            Err(self.reject(decision.reason, end_entity, "server"))
        }
    }
}

impl fmt::Debug for RevocationAwareTrustManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationAwareTrustManager")
            .field("trust_anchors", &self.root_subjects.len())
            .field("revocations", &self.revocations)
            .field("client_auth_required", &self.client_auth_required)
            .finish()
    }
}
