pub mod bootstrap;
pub mod config;
pub mod error;
pub mod network;
pub mod security;

pub use bootstrap::{MutualTlsBootstrap, ServerScheme, TrustRuntime};
pub use config::{TrustConfig, TrustSettings};
pub use error::{Result, TrustError};
