//! Trustgate Security Module
//!
//! Mutual TLS trust pipeline with revocation-aware verification.
//!
//! ## Key Components
//!
//! - **Key Material**: key store and trust store decoding, optionally password sealed
//! - **Revocation**: wholesale-rebuilt revocation index swapped without locks
//! - **Trust Authority**: composed trust manager and ready-to-use rustls configurations
//! - **Gate**: per-request revocation re-check on established connections

pub mod auth;
pub mod metrics;
pub mod tls;

#[cfg(test)]
pub mod tests;

pub use auth::{DenyReason, GateDecision, RevocationCheckingGate};
pub use metrics::{SecurityMetrics, SecurityMetricsSnapshot};
pub use tls::{
    KeyMaterial, KeyMaterialLoader, RevocationAwareTrustManager, RevocationEntry,
    RevocationIndex, SharedRevocationIndex, SharedTrustAuthority, TlsContext, TrustAnchorSet,
    TrustAuthority, TrustDecision, TrustReason,
};
