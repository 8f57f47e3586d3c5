//! TLS trust pipeline
//!
//! Key material loading, the revocation index, the revocation-aware trust
//! manager and the trust authority that assembles them into rustls
//! configurations.

pub mod authority;
pub mod certificate;
pub mod key_encryption;
pub mod key_material;
pub mod revocation;
pub mod trust_manager;

pub use authority::{SharedTrustAuthority, TlsContext, TrustAuthority};
pub use certificate::{calculate_fingerprint, CertificateFingerprint, CertificateIdentity};
pub use key_encryption::{is_sealed, open_store, seal_store, MIN_PBKDF2_ITERATIONS};
pub use key_material::{KeyMaterial, KeyMaterialLoader, TrustAnchorSet};
pub use revocation::{ReloadOutcome, RevocationEntry, RevocationIndex, SharedRevocationIndex};
pub use trust_manager::{RevocationAwareTrustManager, TrustDecision, TrustReason};
