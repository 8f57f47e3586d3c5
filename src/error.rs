use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrustError>;

/// Specific failure behind a [`TrustError::KeyMaterial`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyMaterialErrorKind {
    BadPassword,
    Malformed,
    NoKeyFound,
    MissingTrustAnchors,
}

impl fmt::Display for KeyMaterialErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyMaterialErrorKind::BadPassword => "bad password",
            KeyMaterialErrorKind::Malformed => "malformed",
            KeyMaterialErrorKind::NoKeyFound => "no key found",
            KeyMaterialErrorKind::MissingTrustAnchors => "missing trust anchors",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Key material error ({kind}): {reason}")]
    KeyMaterial {
        kind: KeyMaterialErrorKind,
        reason: String,
    },

    #[error("Malformed revocation list: {reason}")]
    RevocationList { reason: String },

    #[error("Invalid certificate: {reason}")]
    InvalidCertificate { reason: String },

    #[error("Encryption error: {reason}")]
    Encryption { reason: String },

    #[error("TLS handshake rejected: {reason}")]
    HandshakeRejected { reason: String },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Network error: {0}")]
    Network(String),
}

impl TrustError {
    pub(crate) fn key_material(kind: KeyMaterialErrorKind, reason: impl Into<String>) -> Self {
        TrustError::KeyMaterial {
            kind,
            reason: reason.into(),
        }
    }

    /// Kind of a key material failure, if this is one.
    pub fn key_material_kind(&self) -> Option<KeyMaterialErrorKind> {
        match self {
            TrustError::KeyMaterial { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Errors that must abort initialization rather than leave a partial trust
    /// configuration active.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            TrustError::Config(_)
                | TrustError::InvalidConfig(_)
                | TrustError::KeyMaterial { .. }
                | TrustError::Encryption { .. }
                | TrustError::Io(_)
                | TrustError::Tls(_)
        )
    }
}
