//! Cross-component tests for the trust pipeline
//!
//! Unit tests live next to each component; the modules here exercise the
//! loader, revocation index, trust authority and gate together.


// Re-export test utilities for convenient access
pub use test_utils::*;
