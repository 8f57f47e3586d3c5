//! Trustgate HTTPS server CLI
//!
//! Serves a minimal application behind the mutual TLS trust pipeline and the
//! per-request revocation gate.

use anyhow::Context;
use async_trait::async_trait;
use hyper::{Body, Request, Response};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use trustgate::config::FileSystemResolver;
use trustgate::network::{ContainerBindingAdapter, HyperTlsAdapter, RequestHandler};
use trustgate::{MutualTlsBootstrap, TrustSettings};

struct OkHandler;

#[async_trait]
impl RequestHandler for OkHandler {
    async fn handle(&self, _request: Request<Body>) -> Response<Body> {
        Response::new(Body::from("ok"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let default_config = "config/trustgate.toml".to_string();
    let config_path = args.get(1).unwrap_or(&default_config);

    info!("Starting trustgate server");
    info!("Loading configuration from: {}", config_path);

    let settings = TrustSettings::from_file(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let runtime = Arc::new(
        MutualTlsBootstrap::initialize(&settings, Arc::new(FileSystemResolver))
            .context("failed to initialize mutual TLS")?,
    );
    info!(scheme = %runtime.scheme(), "Effective server scheme");

    let binding = match runtime.server_binding() {
        Some(binding) => binding,
        None => {
            warn!("Server customization is disabled, no HTTPS listener to run");
            return Ok(());
        }
    };

    let reloader = runtime.spawn_revocation_reloader();

    let server = HyperTlsAdapter::new(settings.listen_addr()?)
        .bind(binding)
        .context("failed to bind HTTPS listener")?;
    info!("Listening on https://{}", server.local_addr());

    server
        .serve(Arc::new(OkHandler), async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received shutdown signal (Ctrl+C)");
        })
        .await?;

    if let Some(reloader) = reloader {
        reloader.abort();
    }

    if let Some(metrics) = runtime.metrics() {
        info!(metrics = ?metrics.snapshot(), "Final security metrics");
    }

    Ok(())
}
