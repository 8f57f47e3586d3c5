//! Startup wiring
//!
//! Decides once, from the `enabled` and `server_customization_enabled` flags,
//! which trust components exist, and builds them. Any failure here aborts
//! initialization; no partially configured trust pipeline is ever returned.

use crate::config::{MaterialResolver, RevocationFailurePolicy, TrustConfig, TrustSettings};
use crate::error::Result;
use crate::network::{OutboundTlsClient, ServerTlsBinding};
use crate::security::auth::RevocationCheckingGate;
use crate::security::metrics::SecurityMetrics;
use crate::security::tls::{ReloadOutcome, SharedTrustAuthority, TlsContext, TrustAuthority};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Effective scheme of the inbound server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerScheme {
    Https,
    Http,
}

impl ServerScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerScheme::Https => "https",
            ServerScheme::Http => "http",
        }
    }
}

impl fmt::Display for ServerScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct MutualTlsBootstrap;

impl MutualTlsBootstrap {
    pub fn scheme(settings: &TrustSettings) -> ServerScheme {
        if settings.enabled && settings.server_customization_enabled {
            ServerScheme::Https
        } else {
            ServerScheme::Http
        }
    }

    pub fn initialize(
        settings: &TrustSettings,
        resolver: Arc<dyn MaterialResolver>,
    ) -> Result<TrustRuntime> {
        let scheme = Self::scheme(settings);

        if !settings.enabled {
            info!(%scheme, "Mutual TLS disabled");
            return Ok(TrustRuntime {
                scheme,
                settings: settings.clone(),
                resolver,
                components: None,
            });
        }

        let config = TrustConfig::resolve(settings, resolver.as_ref())?;
        let metrics = Arc::new(SecurityMetrics::new());
        let authority = Arc::new(SharedTrustAuthority::new(TrustAuthority::with_metrics(
            &config,
            metrics.clone(),
        )?));

        let gate = settings
            .server_customization_enabled
            .then(|| RevocationCheckingGate::new(authority.clone(), metrics.clone()));

        info!(
            %scheme,
            server_customization = settings.server_customization_enabled,
            client_auth_required = config.client_auth_required(),
            "Mutual TLS initialized"
        );

        Ok(TrustRuntime {
            scheme,
            settings: settings.clone(),
            resolver,
            components: Some(TrustComponents {
                authority,
                gate,
                metrics,
                reconfigure: Mutex::new(()),
            }),
        })
    }
}

struct TrustComponents {
    authority: Arc<SharedTrustAuthority>,
    gate: Option<RevocationCheckingGate>,
    metrics: Arc<SecurityMetrics>,
    /// Held across rotation and revocation reload so neither undoes the other.
    reconfigure: Mutex<()>,
}

/// The constructed trust pipeline. Empty when mutual TLS is disabled.
pub struct TrustRuntime {
    scheme: ServerScheme,
    settings: TrustSettings,
    resolver: Arc<dyn MaterialResolver>,
    components: Option<TrustComponents>,
}

impl TrustRuntime {
    pub fn scheme(&self) -> ServerScheme {
        self.scheme
    }

    pub fn is_enabled(&self) -> bool {
        self.components.is_some()
    }

    pub fn authority(&self) -> Option<&Arc<SharedTrustAuthority>> {
        self.components.as_ref().map(|c| &c.authority)
    }

    pub fn tls_context(&self) -> Option<TlsContext> {
        self.authority()
            .map(|authority| authority.current().context().clone())
    }

    /// Present only when server customization is enabled.
    pub fn gate(&self) -> Option<&RevocationCheckingGate> {
        self.components.as_ref().and_then(|c| c.gate.as_ref())
    }

    pub fn server_binding(&self) -> Option<ServerTlsBinding> {
        let components = self.components.as_ref()?;
        let gate = components.gate.clone()?;
        Some(ServerTlsBinding::new(components.authority.clone(), gate))
    }

    pub fn outbound_client(&self) -> Option<OutboundTlsClient> {
        self.tls_context()
            .map(|context| OutboundTlsClient::new(&context))
    }

    pub fn metrics(&self) -> Option<&Arc<SecurityMetrics>> {
        self.components.as_ref().map(|c| &c.metrics)
    }

    pub fn settings(&self) -> &TrustSettings {
        &self.settings
    }

    /// Build a new authority from `config` and swap it in. The configured
    /// revocation list is re-resolved into the new authority first, so a
    /// rotation never brings back entries a reload already replaced. On error
    /// the current authority stays in effect.
    pub fn rotate(&self, config: &TrustConfig) -> Result<()> {
        let components = match &self.components {
            Some(components) => components,
            None => return Ok(()),
        };

        let _guard = components.reconfigure.lock();
        let authority = TrustAuthority::with_metrics(config, components.metrics.clone())?;
        if let Some(bytes) = self.resolve_revocation_list()? {
            authority.reload_revocation_list(Some(bytes.as_slice()), self.revocation_policy())?;
        }
        components.authority.rotate(authority);
        Ok(())
    }

    /// Re-resolve the configured revocation list and swap in a rebuilt index.
    pub fn reload_revocation_list(&self) -> Result<Option<ReloadOutcome>> {
        let components = match &self.components {
            Some(components) => components,
            None => return Ok(None),
        };

        let _guard = components.reconfigure.lock();
        let bytes = self.resolve_revocation_list()?;
        components
            .authority
            .current()
            .reload_revocation_list(bytes.as_deref(), self.revocation_policy())
            .map(Some)
    }

    fn resolve_revocation_list(&self) -> Result<Option<Vec<u8>>> {
        match &self.settings.revocation_list {
            Some(material) => self.resolver.resolve(material).map(Some),
            None => Ok(None),
        }
    }

    fn revocation_policy(&self) -> RevocationFailurePolicy {
        self.settings.revocation_failure_policy
    }

    /// Periodically reload the revocation list off the request path. Returns
    /// `None` when reloading is disabled.
    pub fn spawn_revocation_reloader(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval_secs = self.settings.revocation_reload_interval_secs;
        if interval_secs == 0 || !self.is_enabled() {
            return None;
        }

        let runtime = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            // First tick completes immediately and startup already loaded the list
            interval.tick().await;

            loop {
                interval.tick().await;

                let reload = runtime.clone();
                match tokio::task::spawn_blocking(move || reload.reload_revocation_list()).await {
                    Ok(Ok(Some(ReloadOutcome::Replaced { entries }))) => {
                        info!(entries, "Scheduled revocation list reload complete");
                    }
                    Ok(Ok(Some(ReloadOutcome::KeptPrevious))) | Ok(Ok(None)) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "Scheduled revocation list reload failed, keeping previous index");
                    }
                    Err(e) => {
                        error!(error = %e, "Revocation reload task panicked");
                    }
                }
            }
        }))
    }
}

impl fmt::Debug for TrustRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustRuntime")
            .field("scheme", &self.scheme)
            .field("enabled", &self.is_enabled())
            .field("gate", &self.gate().is_some())
            .finish()
    }
}
