//! Trust pipeline metrics
//!
//! Lock-free counters shared by the trust manager, the revocation gate and the
//! trust authority.
//!
//! ## Metrics Categories
//!
//! - **Handshake Metrics**: accepted peers and rejections by reason, handshake latency
//! - **Gate Metrics**: allowed requests and denials by reason
//! - **Lifecycle Metrics**: revocation list reloads and trust authority rotations

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Security metrics collector
#[derive(Debug, Default)]
pub struct SecurityMetrics {
    // Handshake metrics
    handshakes_accepted: AtomicU64,
    handshakes_rejected_untrusted: AtomicU64,
    handshakes_rejected_expired: AtomicU64,
    handshakes_rejected_revoked: AtomicU64,
    handshake_latency_sum_nanos: AtomicU64,
    handshake_latency_count: AtomicU64,

    // Gate metrics
    gate_allowed: AtomicU64,
    gate_denied_no_cert: AtomicU64,
    gate_denied_revoked: AtomicU64,

    // Lifecycle
    revocation_reloads: AtomicU64,
    revocation_reload_failures: AtomicU64,
    authority_rotations: AtomicU64,

    // Connections
    active_connections: AtomicU64,
}

impl SecurityMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Handshake metrics

    pub fn record_handshake_accepted(&self) {
        self.handshakes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_untrusted(&self) {
        self.handshakes_rejected_untrusted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_expired(&self) {
        self.handshakes_rejected_expired
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_revoked(&self) {
        self.handshakes_rejected_revoked
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_latency(&self, latency: Duration) {
        self.handshake_latency_sum_nanos
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        self.handshake_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    // Gate metrics

    pub fn record_gate_allowed(&self) {
        self.gate_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gate_denied_no_cert(&self) {
        self.gate_denied_no_cert.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gate_denied_revoked(&self) {
        self.gate_denied_revoked.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle

    pub fn record_revocation_reload(&self) {
        self.revocation_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revocation_reload_failure(&self) {
        self.revocation_reload_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_authority_rotation(&self) {
        self.authority_rotations.fetch_add(1, Ordering::Relaxed);
    }

    // Connections

    pub fn record_connection_established(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Computed metrics

    pub fn total_handshake_rejections(&self) -> u64 {
        self.handshakes_rejected_untrusted.load(Ordering::Relaxed)
            + self.handshakes_rejected_expired.load(Ordering::Relaxed)
            + self.handshakes_rejected_revoked.load(Ordering::Relaxed)
    }

    pub fn handshake_success_rate(&self) -> f64 {
        let accepted = self.handshakes_accepted.load(Ordering::Relaxed);
        let total = accepted + self.total_handshake_rejections();

        if total == 0 {
            1.0
        } else {
            accepted as f64 / total as f64
        }
    }

    pub fn average_handshake_latency_nanos(&self) -> f64 {
        let sum = self.handshake_latency_sum_nanos.load(Ordering::Relaxed);
        let count = self.handshake_latency_count.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> SecurityMetricsSnapshot {
        SecurityMetricsSnapshot {
            handshakes_accepted: self.handshakes_accepted.load(Ordering::Relaxed),
            handshakes_rejected_untrusted: self
                .handshakes_rejected_untrusted
                .load(Ordering::Relaxed),
            handshakes_rejected_expired: self.handshakes_rejected_expired.load(Ordering::Relaxed),
            handshakes_rejected_revoked: self.handshakes_rejected_revoked.load(Ordering::Relaxed),
            handshake_success_rate: self.handshake_success_rate(),
            avg_handshake_latency_nanos: self.average_handshake_latency_nanos(),

            gate_allowed: self.gate_allowed.load(Ordering::Relaxed),
            gate_denied_no_cert: self.gate_denied_no_cert.load(Ordering::Relaxed),
            gate_denied_revoked: self.gate_denied_revoked.load(Ordering::Relaxed),

            revocation_reloads: self.revocation_reloads.load(Ordering::Relaxed),
            revocation_reload_failures: self.revocation_reload_failures.load(Ordering::Relaxed),
            authority_rotations: self.authority_rotations.load(Ordering::Relaxed),

            active_connections: self.active_connections(),
        }
    }
}

/// Snapshot of security metrics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityMetricsSnapshot {
    // Handshake metrics
    pub handshakes_accepted: u64,
    pub handshakes_rejected_untrusted: u64,
    pub handshakes_rejected_expired: u64,
    pub handshakes_rejected_revoked: u64,
    pub handshake_success_rate: f64,
    pub avg_handshake_latency_nanos: f64,

    // Gate metrics
    pub gate_allowed: u64,
    pub gate_denied_no_cert: u64,
    pub gate_denied_revoked: u64,

    // Lifecycle
    pub revocation_reloads: u64,
    pub revocation_reload_failures: u64,
    pub authority_rotations: u64,

    pub active_connections: u64,
}

impl SecurityMetricsSnapshot {
    pub fn gate_denials(&self) -> u64 {
        self.gate_denied_no_cert + self.gate_denied_revoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_handshake_counters() {
        let metrics = SecurityMetrics::new();

        metrics.record_handshake_accepted();
        metrics.record_handshake_revoked();
        metrics.record_handshake_latency(Duration::from_nanos(50));

        assert_eq!(metrics.handshake_success_rate(), 0.5);
        assert_eq!(metrics.total_handshake_rejections(), 1);
        assert_eq!(metrics.average_handshake_latency_nanos(), 50.0);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = SecurityMetrics::new();

        metrics.record_gate_allowed();
        metrics.record_gate_denied_no_cert();
        metrics.record_gate_denied_revoked();
        metrics.record_revocation_reload();
        metrics.record_authority_rotation();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.gate_allowed, 1);
        assert_eq!(snapshot.gate_denials(), 2);
        assert_eq!(snapshot.revocation_reloads, 1);
        assert_eq!(snapshot.revocation_reload_failures, 0);
        assert_eq!(snapshot.authority_rotations, 1);
        assert_eq!(snapshot.handshake_success_rate, 1.0);
    }

    #[test]
    fn test_connection_metrics() {
        let metrics = SecurityMetrics::new();

        metrics.record_connection_established();
        metrics.record_connection_established();
        assert_eq!(metrics.active_connections(), 2);

        metrics.record_connection_closed();
        assert_eq!(metrics.active_connections(), 1);
    }
}
