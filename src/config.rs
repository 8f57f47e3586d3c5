//! Configuration surface for the mutual TLS trust pipeline.
//!
//! [`TrustSettings`] is what operators write (TOML), [`TrustConfig`] is the
//! resolved, validated and immutable form handed to the key material loader.

use crate::error::{Result, TrustError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Where a piece of key material comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialRef {
    /// Location on the local filesystem
    Path(PathBuf),
    /// Inline PEM text
    Pem(String),
    /// Inline binary blob
    Bytes(Vec<u8>),
}

/// A configured password. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What to do when a revocation list cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationFailurePolicy {
    /// Reject startup, or keep the previous index and report the error on reload
    #[default]
    Fatal,
    /// Log a warning and carry on with the last good (or an empty) index
    FailOpen,
}

/// Operator-facing settings, typically loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSettings {
    /// Master switch; nothing is constructed when false
    pub enabled: bool,

    /// Whether the inbound server is configured for TLS and the gate installed
    pub server_customization_enabled: bool,

    /// PEM bundle (optionally sealed) with this party's key and certificate chain
    pub key_store: Option<MaterialRef>,
    pub key_store_password: Secret,

    /// PEM bundle (optionally sealed) with trusted CA certificates
    pub trust_store: Option<MaterialRef>,
    pub trust_store_password: Secret,

    /// CRLs and/or text revocation entries
    pub revocation_list: Option<MaterialRef>,

    /// Whether connecting clients must present a certificate
    pub client_auth_required: bool,

    /// Enabled TLS protocol versions
    pub protocols: Vec<String>,

    pub revocation_failure_policy: RevocationFailurePolicy,

    /// Seconds between revocation list reloads, 0 disables reloading
    pub revocation_reload_interval_secs: u64,

    /// Socket address the HTTPS server binds to
    pub listen: String,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            server_customization_enabled: true,
            key_store: None,
            key_store_password: Secret::default(),
            trust_store: None,
            trust_store_password: Secret::default(),
            revocation_list: None,
            client_auth_required: true,
            protocols: vec!["TLSv1.3".to_string(), "TLSv1.2".to_string()],
            revocation_failure_policy: RevocationFailurePolicy::Fatal,
            revocation_reload_interval_secs: 0,
            listen: "127.0.0.1:8443".to_string(),
        }
    }
}

impl TrustSettings {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TrustError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.key_store.is_none() {
            return Err(TrustError::InvalidConfig(
                "key_store must be configured when TLS is enabled".to_string(),
            ));
        }

        if self.client_auth_required && self.trust_store.is_none() {
            return Err(TrustError::InvalidConfig(
                "trust_store must be configured when client_auth_required is true".to_string(),
            ));
        }

        parse_protocols(&self.protocols)?;

        if self.server_customization_enabled {
            self.listen_addr()?;
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            TrustError::InvalidConfig(format!("listen address '{}' is invalid: {}", self.listen, e))
        })
    }
}

/// Map configured protocol names onto rustls protocol versions.
pub fn parse_protocols(
    protocols: &[String],
) -> Result<Vec<&'static rustls::SupportedProtocolVersion>> {
    if protocols.is_empty() {
        return Err(TrustError::InvalidConfig(
            "protocols cannot be empty".to_string(),
        ));
    }

    let mut versions: Vec<&'static rustls::SupportedProtocolVersion> = Vec::new();
    for name in protocols {
        let version = match name.trim().to_ascii_uppercase().as_str() {
            "TLSV1.3" | "TLS1.3" => &rustls::version::TLS13,
            "TLSV1.2" | "TLS1.2" => &rustls::version::TLS12,
            _ => {
                return Err(TrustError::InvalidConfig(format!(
                    "unsupported TLS protocol '{}' (expected TLSv1.2 or TLSv1.3)",
                    name
                )));
            }
        };
        if !versions.iter().any(|v| v.version == version.version) {
            versions.push(version);
        }
    }

    Ok(versions)
}

/// Turns a [`MaterialRef`] into bytes. Retrieval is kept outside the loader so
/// that the loader itself never touches the filesystem or network.
pub trait MaterialResolver: Send + Sync {
    fn resolve(&self, material: &MaterialRef) -> Result<Vec<u8>>;
}

/// Reads `Path` references from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemResolver;

impl MaterialResolver for FileSystemResolver {
    fn resolve(&self, material: &MaterialRef) -> Result<Vec<u8>> {
        match material {
            MaterialRef::Path(path) => std::fs::read(path).map_err(|e| {
                TrustError::Config(format!("cannot read {}: {}", path.display(), e))
            }),
            MaterialRef::Pem(text) => Ok(text.as_bytes().to_vec()),
            MaterialRef::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Resolved and validated trust configuration.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    key_store: Vec<u8>,
    key_store_password: Secret,
    trust_store: Option<Vec<u8>>,
    trust_store_password: Secret,
    revocation_list: Option<Vec<u8>>,
    client_auth_required: bool,
    protocols: Vec<String>,
    revocation_failure_policy: RevocationFailurePolicy,
}

impl TrustConfig {
    pub fn builder(key_store: impl Into<Vec<u8>>) -> TrustConfigBuilder {
        TrustConfigBuilder::new(key_store)
    }

    /// Resolve every material reference in `settings` and validate the result.
    pub fn resolve(settings: &TrustSettings, resolver: &dyn MaterialResolver) -> Result<Self> {
        settings.validate()?;

        let key_store = match &settings.key_store {
            Some(material) => resolver.resolve(material)?,
            None => {
                return Err(TrustError::InvalidConfig(
                    "key_store must be configured".to_string(),
                ));
            }
        };

        let mut builder = TrustConfig::builder(key_store)
            .key_store_password(settings.key_store_password.clone())
            .trust_store_password(settings.trust_store_password.clone())
            .client_auth_required(settings.client_auth_required)
            .protocols(settings.protocols.clone())
            .revocation_failure_policy(settings.revocation_failure_policy);

        if let Some(material) = &settings.trust_store {
            builder = builder.trust_store(resolver.resolve(material)?);
        }

        if let Some(material) = &settings.revocation_list {
            builder = builder.revocation_list(resolver.resolve(material)?);
        }

        builder.build()
    }

    pub fn key_store(&self) -> &[u8] {
        &self.key_store
    }

    pub fn key_store_password(&self) -> &Secret {
        &self.key_store_password
    }

    pub fn trust_store(&self) -> Option<&[u8]> {
        self.trust_store.as_deref()
    }

    pub fn trust_store_password(&self) -> &Secret {
        &self.trust_store_password
    }

    pub fn revocation_list(&self) -> Option<&[u8]> {
        self.revocation_list.as_deref()
    }

    pub fn client_auth_required(&self) -> bool {
        self.client_auth_required
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn protocol_versions(&self) -> Result<Vec<&'static rustls::SupportedProtocolVersion>> {
        parse_protocols(&self.protocols)
    }

    pub fn revocation_failure_policy(&self) -> RevocationFailurePolicy {
        self.revocation_failure_policy
    }
}

#[derive(Debug, Clone)]
pub struct TrustConfigBuilder {
    config: TrustConfig,
}

impl TrustConfigBuilder {
    fn new(key_store: impl Into<Vec<u8>>) -> Self {
        Self {
            config: TrustConfig {
                key_store: key_store.into(),
                key_store_password: Secret::default(),
                trust_store: None,
                trust_store_password: Secret::default(),
                revocation_list: None,
                client_auth_required: true,
                protocols: vec!["TLSv1.3".to_string(), "TLSv1.2".to_string()],
                revocation_failure_policy: RevocationFailurePolicy::Fatal,
            },
        }
    }

    pub fn key_store_password(mut self, password: impl Into<Secret>) -> Self {
        self.config.key_store_password = password.into();
        self
    }

    pub fn trust_store(mut self, trust_store: impl Into<Vec<u8>>) -> Self {
        self.config.trust_store = Some(trust_store.into());
        self
    }

    pub fn trust_store_password(mut self, password: impl Into<Secret>) -> Self {
        self.config.trust_store_password = password.into();
        self
    }

    pub fn revocation_list(mut self, revocation_list: impl Into<Vec<u8>>) -> Self {
        self.config.revocation_list = Some(revocation_list.into());
        self
    }

    pub fn client_auth_required(mut self, required: bool) -> Self {
        self.config.client_auth_required = required;
        self
    }

    pub fn protocols(mut self, protocols: Vec<String>) -> Self {
        self.config.protocols = protocols;
        self
    }

    pub fn revocation_failure_policy(mut self, policy: RevocationFailurePolicy) -> Self {
        self.config.revocation_failure_policy = policy;
        self
    }

    pub fn build(self) -> Result<TrustConfig> {
        let config = self.config;

        if config.key_store.is_empty() {
            return Err(TrustError::InvalidConfig(
                "key_store cannot be empty".to_string(),
            ));
        }

        let has_trust_store = config
            .trust_store
            .as_ref()
            .map_or(false, |bytes| !bytes.is_empty());
        if config.client_auth_required && !has_trust_store {
            return Err(TrustError::InvalidConfig(
                "trust_store cannot be empty when client_auth_required is true".to_string(),
            ));
        }

        parse_protocols(&config.protocols)?;

        Ok(config)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_toml() {
        let settings = TrustSettings::from_toml_str("").unwrap();
        assert_eq!(settings, TrustSettings::default());
        assert!(settings.enabled);
        assert!(settings.client_auth_required);
        assert_eq!(settings.revocation_failure_policy, RevocationFailurePolicy::Fatal);
    }

    #[test]
    fn test_material_refs_from_toml() {
        let settings = TrustSettings::from_toml_str(
            r#"
            client_auth_required = false
            protocols = ["TLSv1.3"]
            revocation_failure_policy = "fail_open"
            key_store_password = "changeit"

            [key_store]
            path = "/etc/trustgate/server.pem"

            [trust_store]
            pem = "-----BEGIN CERTIFICATE-----"
            "#,
        )
        .unwrap();

        assert_eq!(
            settings.key_store,
            Some(MaterialRef::Path(PathBuf::from("/etc/trustgate/server.pem")))
        );
        assert_eq!(
            settings.trust_store,
            Some(MaterialRef::Pem("-----BEGIN CERTIFICATE-----".to_string()))
        );
        assert_eq!(settings.key_store_password.expose(), "changeit");
        assert_eq!(settings.revocation_failure_policy, RevocationFailurePolicy::FailOpen);
        assert!(!settings.client_auth_required);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
    }

    #[test]
    fn test_validate_requires_trust_store_for_client_auth() {
        let settings = TrustSettings {
            key_store: Some(MaterialRef::Pem("x".to_string())),
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, TrustError::InvalidConfig(msg) if msg.contains("trust_store")));
    }

    #[test]
    fn test_validate_skipped_when_disabled() {
        let settings = TrustSettings {
            enabled: false,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_protocol_parsing() {
        let versions =
            parse_protocols(&["TLSv1.2".to_string(), "tlsv1.3".to_string(), "TLSv1.2".to_string()])
                .unwrap();
        assert_eq!(versions.len(), 2);

        assert!(parse_protocols(&["TLSv1.1".to_string()]).is_err());
        assert!(parse_protocols(&[]).is_err());
    }

    #[test]
    fn test_builder_enforces_trust_store_invariant() {
        let err = TrustConfig::builder(b"key".to_vec()).build().unwrap_err();
        assert!(matches!(err, TrustError::InvalidConfig(_)));

        let err = TrustConfig::builder(b"key".to_vec())
            .trust_store(Vec::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, TrustError::InvalidConfig(_)));

        let config = TrustConfig::builder(b"key".to_vec())
            .client_auth_required(false)
            .build()
            .unwrap();
        assert!(config.trust_store().is_none());
    }

    #[test]
    fn test_resolve_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.pem");
        std::fs::write(&key_path, b"key-bytes").unwrap();

        let settings = TrustSettings {
            key_store: Some(MaterialRef::Path(key_path)),
            trust_store: Some(MaterialRef::Bytes(b"trust-bytes".to_vec())),
            revocation_list: Some(MaterialRef::Pem("sha256:00".to_string())),
            ..Default::default()
        };

        let config = TrustConfig::resolve(&settings, &FileSystemResolver).unwrap();
        assert_eq!(config.key_store(), b"key-bytes");
        assert_eq!(config.trust_store(), Some(&b"trust-bytes"[..]));
        assert_eq!(config.revocation_list(), Some(&b"sha256:00"[..]));
    }

    #[test]
    fn test_resolve_missing_file_is_config_error() {
        let settings = TrustSettings {
            key_store: Some(MaterialRef::Path(PathBuf::from("/nonexistent/trustgate.pem"))),
            client_auth_required: false,
            ..Default::default()
        };
        let err = TrustConfig::resolve(&settings, &FileSystemResolver).unwrap_err();
        assert!(matches!(err, TrustError::Config(_)));
    }
}
