//! Trust authority
//!
//! Owns the loaded key material and trust anchors for one trust configuration
//! and produces the rustls server and client configurations built around the
//! revocation-aware trust manager.
//!
//! A `TrustAuthority` is never mutated after construction. Certificate rotation
//! builds a new authority and swaps it into a [`SharedTrustAuthority`]; the only
//! state replaced in place is the revocation index, which is itself swapped
//! wholesale.

use super::key_material::{KeyMaterial, KeyMaterialLoader, TrustAnchorSet};
use super::revocation::{ReloadOutcome, RevocationIndex, SharedRevocationIndex};
use super::trust_manager::{RevocationAwareTrustManager, TrustDecision};
use crate::config::{RevocationFailurePolicy, TrustConfig};
use crate::error::{KeyMaterialErrorKind, Result, TrustError};
use crate::security::metrics::SecurityMetrics;

use arc_swap::ArcSwap;
use rustls::client::ServerCertVerifier;
use rustls::client::Resumption;
use rustls::server::{ClientCertVerifier, NoServerSessionStorage};
use rustls::{Certificate, ClientConfig, ServerConfig, SupportedProtocolVersion};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

const ALPN_HTTP_1_1: &[u8] = b"http/1.1";

/// Ready-to-use TLS configurations for both directions.
#[derive(Clone)]
pub struct TlsContext {
    pub server_config: Arc<ServerConfig>,
    pub client_config: Arc<ClientConfig>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("server_alpn", &self.server_config.alpn_protocols.len())
            .field("client_alpn", &self.client_config.alpn_protocols.len())
            .finish()
    }
}

pub struct TrustAuthority {
    key_material: KeyMaterial,
    anchors: TrustAnchorSet,
    revocations: Arc<SharedRevocationIndex>,
    trust_manager: Arc<RevocationAwareTrustManager>,
    context: TlsContext,
    client_auth_required: bool,
    protocols: Vec<String>,
    metrics: Arc<SecurityMetrics>,
}

impl TrustAuthority {
    pub fn new(config: &TrustConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(SecurityMetrics::new()))
    }

    pub fn with_metrics(config: &TrustConfig, metrics: Arc<SecurityMetrics>) -> Result<Self> {
        let (key_material, anchors) = KeyMaterialLoader::load(config)?;
        let versions = config.protocol_versions()?;

        let index = match RevocationIndex::build(config.revocation_list()) {
            Ok(index) => index,
            Err(e) => match config.revocation_failure_policy() {
                RevocationFailurePolicy::Fatal => return Err(e),
                RevocationFailurePolicy::FailOpen => {
                    warn!(
                        error = %e,
                        "Revocation list rejected at startup, continuing without revocation checks"
                    );
                    metrics.record_revocation_reload_failure();
                    RevocationIndex::empty()
                }
            },
        };
        let revoked_entries = index.len();
        let revocations = Arc::new(SharedRevocationIndex::new(index));

        let trust_manager = Arc::new(RevocationAwareTrustManager::new(
            &anchors,
            revocations.clone(),
            config.client_auth_required(),
            metrics.clone(),
        ));

        let context = TlsContext {
            server_config: Arc::new(build_server_config(
                &key_material,
                &anchors,
                &trust_manager,
                &versions,
            )?),
            client_config: Arc::new(build_client_config(&key_material, &trust_manager, &versions)?),
        };

        info!(
            subject = %key_material.identity().subject,
            trust_anchors = anchors.len(),
            revoked_entries,
            client_auth_required = config.client_auth_required(),
            "Trust authority initialized"
        );

        Ok(Self {
            key_material,
            anchors,
            revocations,
            trust_manager,
            context,
            client_auth_required: config.client_auth_required(),
            protocols: config.protocols().to_vec(),
            metrics,
        })
    }

    pub fn context(&self) -> &TlsContext {
        &self.context
    }

    pub fn trust_manager(&self) -> Arc<RevocationAwareTrustManager> {
        self.trust_manager.clone()
    }

    /// Chain validation followed by revocation lookup.
    pub fn validate(&self, chain: &[Certificate]) -> TrustDecision {
        self.trust_manager.validate(chain)
    }

    pub fn is_revoked(&self, certificate: &Certificate) -> bool {
        self.revocations.load().is_revoked(certificate)
    }

    pub fn key_material(&self) -> &KeyMaterial {
        &self.key_material
    }

    pub fn trust_anchors(&self) -> &TrustAnchorSet {
        &self.anchors
    }

    pub fn client_auth_required(&self) -> bool {
        self.client_auth_required
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn revocations(&self) -> &Arc<SharedRevocationIndex> {
        &self.revocations
    }

    pub fn metrics(&self) -> &Arc<SecurityMetrics> {
        &self.metrics
    }

    /// Rebuild the revocation index from `revocation_list` and swap it in.
    /// Handshakes and gate checks started after the swap see the new index.
    pub fn reload_revocation_list(
        &self,
        revocation_list: Option<&[u8]>,
        policy: RevocationFailurePolicy,
    ) -> Result<ReloadOutcome> {
        match self.revocations.reload(revocation_list, policy) {
            Ok(ReloadOutcome::Replaced { entries }) => {
                self.metrics.record_revocation_reload();
                Ok(ReloadOutcome::Replaced { entries })
            }
            Ok(ReloadOutcome::KeptPrevious) => {
                self.metrics.record_revocation_reload_failure();
                Ok(ReloadOutcome::KeptPrevious)
            }
            Err(e) => {
                self.metrics.record_revocation_reload_failure();
                Err(e)
            }
        }
    }
}

impl fmt::Debug for TrustAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAuthority")
            .field("key_material", &self.key_material)
            .field("trust_anchors", &self.anchors)
            .field("revocations", &self.revocations)
            .field("client_auth_required", &self.client_auth_required)
            .field("protocols", &self.protocols)
            .finish()
    }
}

fn build_server_config(
    key_material: &KeyMaterial,
    anchors: &TrustAnchorSet,
    trust_manager: &Arc<RevocationAwareTrustManager>,
    versions: &[&'static SupportedProtocolVersion],
) -> Result<ServerConfig> {
    let builder = ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(versions)?;

    let builder = if anchors.is_empty() {
        builder.with_no_client_auth()
    } else {
        let verifier: Arc<dyn ClientCertVerifier> = trust_manager.clone();
        builder.with_client_cert_verifier(verifier)
    };

    let mut config = builder
        .with_single_cert(
            key_material.certificate_chain().to_vec(),
            key_material.private_key().clone(),
        )
        .map_err(|e| {
            TrustError::key_material(
                KeyMaterialErrorKind::Malformed,
                format!("server identity rejected: {}", e),
            )
        })?;
    config.alpn_protocols = vec![ALPN_HTTP_1_1.to_vec()];
    // A resumed handshake skips the client verifier, and with it the revocation lookup
    config.session_storage = Arc::new(NoServerSessionStorage {});

    Ok(config)
}

fn build_client_config(
    key_material: &KeyMaterial,
    trust_manager: &Arc<RevocationAwareTrustManager>,
    versions: &[&'static SupportedProtocolVersion],
) -> Result<ClientConfig> {
    let verifier: Arc<dyn ServerCertVerifier> = trust_manager.clone();

    let mut config = ClientConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(versions)?
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(
            key_material.certificate_chain().to_vec(),
            key_material.private_key().clone(),
        )
        .map_err(|e| {
            TrustError::key_material(
                KeyMaterialErrorKind::Malformed,
                format!("client identity rejected: {}", e),
            )
        })?;
    config.alpn_protocols = vec![ALPN_HTTP_1_1.to_vec()];
    config.resumption = Resumption::disabled();

    Ok(config)
}

/// Atomically swappable reference to the active [`TrustAuthority`].
pub struct SharedTrustAuthority {
    current: ArcSwap<TrustAuthority>,
}

impl SharedTrustAuthority {
    pub fn new(authority: TrustAuthority) -> Self {
        Self {
            current: ArcSwap::from_pointee(authority),
        }
    }

    /// The authority in effect right now. Callers holding the returned `Arc`
    /// keep using that authority even if a rotation happens meanwhile.
    pub fn current(&self) -> Arc<TrustAuthority> {
        self.current.load_full()
    }

    /// Install `authority` and return the one it replaced.
    pub fn rotate(&self, authority: TrustAuthority) -> Arc<TrustAuthority> {
        let authority = Arc::new(authority);
        authority.metrics.record_authority_rotation();
        info!(
            subject = %authority.key_material.identity().subject,
            "Trust authority rotated"
        );
        self.current.swap(authority)
    }

    /// Validate against exactly one authority.
    pub fn validate(&self, chain: &[Certificate]) -> TrustDecision {
        self.current.load().validate(chain)
    }
}

impl fmt::Debug for SharedTrustAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedTrustAuthority")
            .field(&*self.current.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::tests::TestPki;
    use crate::security::tls::trust_manager::TrustReason;

    #[test]
    fn test_authority_builds_context() {
        let pki = TestPki::new("Authority Test CA");
        let authority = TrustAuthority::new(&pki.server_config(None)).unwrap();

        assert_eq!(authority.key_material().certificate_chain().len(), 1);
        assert_eq!(authority.trust_anchors().len(), 1);
        assert!(authority.client_auth_required());
        assert_eq!(
            authority.context().server_config.alpn_protocols,
            vec![b"http/1.1".to_vec()]
        );
        assert!(authority.revocations().load().is_empty());
    }

    #[test]
    fn test_sessions_are_never_resumed() {
        use rustls::server::StoresServerSessions;

        let pki = TestPki::new("Authority Test CA");
        let authority = TrustAuthority::new(&pki.server_config(None)).unwrap();
        let server_config = &authority.context().server_config;

        assert!(!server_config.session_storage.can_cache());
        assert!(!server_config
            .session_storage
            .put(b"session-id".to_vec(), b"state".to_vec()));
        assert!(server_config.session_storage.get(b"session-id").is_none());
    }

    #[test]
    fn test_construction_is_repeatable() {
        let pki = TestPki::new("Authority Test CA");
        let config = pki.server_config(None);
        let client = pki.issue_client("client-a");

        let first = TrustAuthority::new(&config).unwrap();
        let second = TrustAuthority::new(&config).unwrap();

        assert_eq!(
            first.validate(&[client.certificate()]),
            second.validate(&[client.certificate()])
        );
        assert_eq!(
            first.key_material().certificate_chain(),
            second.key_material().certificate_chain()
        );
    }

    #[test]
    fn test_malformed_revocation_list_policy_at_startup() {
        let pki = TestPki::new("Authority Test CA");
        let server = pki.issue_server("localhost");

        let fatal = TrustConfig::builder(server.key_store_pem(&[]))
            .trust_store(pki.trust_store_pem())
            .revocation_list(b"definitely not a list".to_vec())
            .build()
            .unwrap();
        let err = TrustAuthority::new(&fatal).unwrap_err();
        assert!(matches!(err, TrustError::RevocationList { .. }));

        let fail_open = TrustConfig::builder(server.key_store_pem(&[]))
            .trust_store(pki.trust_store_pem())
            .revocation_list(b"definitely not a list".to_vec())
            .revocation_failure_policy(RevocationFailurePolicy::FailOpen)
            .build()
            .unwrap();
        let authority = TrustAuthority::new(&fail_open).unwrap();
        assert!(authority.revocations().load().is_empty());
        assert_eq!(authority.metrics().snapshot().revocation_reload_failures, 1);
    }

    #[test]
    fn test_reload_revocation_list() {
        let pki = TestPki::new("Authority Test CA");
        let client = pki.issue_client("client-a");
        let authority = TrustAuthority::new(&pki.server_config(None)).unwrap();

        assert_eq!(authority.validate(&[client.certificate()]).reason, TrustReason::Valid);
        assert!(!authority.is_revoked(&client.certificate()));

        let outcome = authority
            .reload_revocation_list(
                Some(client.revocation_line().as_bytes()),
                RevocationFailurePolicy::Fatal,
            )
            .unwrap();
        assert_eq!(outcome, ReloadOutcome::Replaced { entries: 1 });
        assert_eq!(authority.validate(&[client.certificate()]).reason, TrustReason::Revoked);
        assert!(authority.is_revoked(&client.certificate()));

        assert!(authority
            .reload_revocation_list(Some(b"garbage"), RevocationFailurePolicy::Fatal)
            .is_err());
        assert!(authority.is_revoked(&client.certificate()));

        let snapshot = authority.metrics().snapshot();
        assert_eq!(snapshot.revocation_reloads, 1);
        assert_eq!(snapshot.revocation_reload_failures, 1);
    }

    #[test]
    fn test_client_auth_optional_without_trust_store() {
        let pki = TestPki::new("Authority Test CA");
        let server = pki.issue_server("localhost");
        let config = TrustConfig::builder(server.key_store_pem(&[]))
            .client_auth_required(false)
            .build()
            .unwrap();

        let authority = TrustAuthority::new(&config).unwrap();
        assert!(authority.trust_anchors().is_empty());
        assert_eq!(
            authority.validate(&[pki.issue_client("anyone").certificate()]).reason,
            TrustReason::UntrustedChain
        );
    }

    #[test]
    fn test_rotation_swaps_whole_authority() {
        let pki = TestPki::new("Authority Test CA");
        let client = pki.issue_client("client-c");

        let shared = SharedTrustAuthority::new(TrustAuthority::new(&pki.server_config(None)).unwrap());
        let v1 = shared.current();
        assert_eq!(shared.validate(&[client.certificate()]).reason, TrustReason::Valid);

        let v2 = TrustAuthority::new(&pki.server_config(Some(&client.revocation_line()))).unwrap();
        let previous = shared.rotate(v2);

        assert!(Arc::ptr_eq(&previous, &v1));
        assert_eq!(shared.validate(&[client.certificate()]).reason, TrustReason::Revoked);
        // Holders of the old authority keep the old behavior
        assert_eq!(v1.validate(&[client.certificate()]).reason, TrustReason::Valid);
    }
}
