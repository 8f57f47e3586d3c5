//! Request-time revocation gate
//!
//! Re-checks the peer certificate of an established connection against the
//! current revocation index on every request. The handshake is authoritative
//! for chain trust, so only revocation is looked up here; this catches
//! certificates revoked after a long-lived connection was established.

use crate::security::metrics::SecurityMetrics;
use crate::security::tls::authority::SharedTrustAuthority;
use crate::security::tls::trust_manager::check_chain_revocation;

use rustls::Certificate;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Internal reason for a denial. Never sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    NoClientCert,
    Revoked,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoClientCert => f.write_str("no_client_cert"),
            DenyReason::Revoked => f.write_str("revoked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Stateless per call; all mutable state is the shared authority it reads.
/// Each check reads one authority snapshot, so a rotation changes both the
/// client-auth requirement and the revocation index at once.
#[derive(Clone)]
pub struct RevocationCheckingGate {
    authority: Arc<SharedTrustAuthority>,
    metrics: Arc<SecurityMetrics>,
}

impl RevocationCheckingGate {
    pub fn new(authority: Arc<SharedTrustAuthority>, metrics: Arc<SecurityMetrics>) -> Self {
        Self { authority, metrics }
    }

    /// Check the peer leaf certificate.
    pub fn check(&self, peer_certificate: Option<&Certificate>) -> GateDecision {
        match peer_certificate {
            Some(certificate) => self.check_chain(Some(std::slice::from_ref(certificate))),
            None => self.check_chain(None),
        }
    }

    /// Check the full peer chain, so that a revoked intermediate also denies.
    pub fn check_chain(&self, peer_chain: Option<&[Certificate]>) -> GateDecision {
        let authority = self.authority.current();
        let chain = match peer_chain {
            Some(chain) if !chain.is_empty() => chain,
            _ => {
                if authority.client_auth_required() {
                    self.metrics.record_gate_denied_no_cert();
                    debug!("Request denied, no client certificate presented");
                    return GateDecision::Deny(DenyReason::NoClientCert);
                }
                self.metrics.record_gate_allowed();
                return GateDecision::Allow;
            }
        };

        let index = authority.revocations().load();
        if check_chain_revocation(&index, chain).trusted {
            self.metrics.record_gate_allowed();
            GateDecision::Allow
        } else {
            self.metrics.record_gate_denied_revoked();
            warn!(
                fingerprint = %hex::encode(crate::security::tls::calculate_fingerprint(&chain[0].0)),
                "Request denied, peer certificate revoked after handshake"
            );
            GateDecision::Deny(DenyReason::Revoked)
        }
    }

    pub fn client_auth_required(&self) -> bool {
        self.authority.current().client_auth_required()
    }
}

impl fmt::Debug for RevocationCheckingGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationCheckingGate")
            .field("client_auth_required", &self.client_auth_required())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RevocationFailurePolicy, TrustConfig};
    use crate::security::tests::TestPki;
    use crate::security::tls::authority::TrustAuthority;

    fn config_with_client_auth(pki: &TestPki, client_auth_required: bool) -> TrustConfig {
        let server = pki.issue_server("localhost");
        TrustConfig::builder(server.key_store_pem(&[]))
            .trust_store(pki.trust_store_pem())
            .client_auth_required(client_auth_required)
            .build()
            .unwrap()
    }

    fn gate_for(pki: &TestPki, client_auth_required: bool) -> RevocationCheckingGate {
        let authority =
            TrustAuthority::new(&config_with_client_auth(pki, client_auth_required)).unwrap();
        let metrics = authority.metrics().clone();
        RevocationCheckingGate::new(Arc::new(SharedTrustAuthority::new(authority)), metrics)
    }

    #[test]
    fn test_missing_certificate_depends_on_client_auth() {
        let pki = TestPki::new("Gate Test CA");

        assert_eq!(
            gate_for(&pki, true).check(None),
            GateDecision::Deny(DenyReason::NoClientCert)
        );
        assert_eq!(gate_for(&pki, false).check(None), GateDecision::Allow);
        assert_eq!(
            gate_for(&pki, true).check_chain(Some(&[])),
            GateDecision::Deny(DenyReason::NoClientCert)
        );
    }

    #[test]
    fn test_revocation_after_handshake_is_denied() {
        let pki = TestPki::new("Gate Test CA");
        let client = pki.issue_client("client-a");
        let gate = gate_for(&pki, true);

        assert_eq!(gate.check(Some(&client.certificate())), GateDecision::Allow);

        gate.authority
            .current()
            .reload_revocation_list(
                Some(client.revocation_line().as_bytes()),
                RevocationFailurePolicy::Fatal,
            )
            .unwrap();

        assert_eq!(
            gate.check(Some(&client.certificate())),
            GateDecision::Deny(DenyReason::Revoked)
        );

        let snapshot = gate.metrics.snapshot();
        assert_eq!(snapshot.gate_allowed, 1);
        assert_eq!(snapshot.gate_denied_revoked, 1);
    }

    #[test]
    fn test_gate_does_not_reverify_chain() {
        let pki = TestPki::new("Gate Test CA");
        let stranger = TestPki::new("Other CA").issue_client("stranger");
        let gate = gate_for(&pki, true);

        assert_eq!(gate.check(Some(&stranger.certificate())), GateDecision::Allow);
    }

    #[test]
    fn test_revoked_intermediate_in_chain() {
        let pki = TestPki::new("Gate Test CA");
        let intermediate = pki.issue_intermediate("Gate Issuing CA");
        let leaf = pki.issue_client_from(&intermediate, "leaf");
        let gate = gate_for(&pki, true);

        gate.authority
            .current()
            .reload_revocation_list(
                Some(intermediate.revocation_line().as_bytes()),
                RevocationFailurePolicy::Fatal,
            )
            .unwrap();

        assert_eq!(gate.check(Some(&leaf.certificate())), GateDecision::Allow);
        assert_eq!(
            gate.check_chain(Some(&[leaf.certificate(), intermediate.certificate()])),
            GateDecision::Deny(DenyReason::Revoked)
        );
    }

    #[test]
    fn test_rotation_changes_client_auth_requirement() {
        let pki = TestPki::new("Gate Test CA");
        let gate = gate_for(&pki, true);
        assert!(gate.client_auth_required());
        assert_eq!(gate.check(None), GateDecision::Deny(DenyReason::NoClientCert));

        gate.authority
            .rotate(TrustAuthority::new(&config_with_client_auth(&pki, false)).unwrap());
        assert!(!gate.client_auth_required());
        assert_eq!(gate.check(None), GateDecision::Allow);

        gate.authority
            .rotate(TrustAuthority::new(&config_with_client_auth(&pki, true)).unwrap());
        assert_eq!(gate.check(None), GateDecision::Deny(DenyReason::NoClientCert));
    }
}
