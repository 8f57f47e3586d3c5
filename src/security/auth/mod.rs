//! Request-time authentication checks
//!
//! The TLS handshake establishes peer identity; this module re-checks that
//! identity on every request.

pub mod gate;

pub use gate::{DenyReason, GateDecision, RevocationCheckingGate};
