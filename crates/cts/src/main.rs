use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cts::catalog::{CatalogEndpoint, LiveCatalogClient};
use cts::config::Config;
use cts::controller::Controller;
use cts::engine::SubprocessEngine;
use cts::store::StateStore;
use cts::view::ViewRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A config-level log filter isn't known until the config is loaded;
    // start with env-only filtering and re-init once it's in hand.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cts=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    config.validate().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

    info!(
        catalog = %config.catalog.address,
        tasks = config.tasks.len(),
        "loaded configuration"
    );

    let http = build_http_client(&config.catalog)?;
    let endpoint = CatalogEndpoint {
        address: config.catalog.address.clone(),
        wait_timeout: std::time::Duration::from_secs(config.catalog.wait_timeout_secs),
        stale: config.catalog.stale,
    };
    let catalog_client = Arc::new(LiveCatalogClient::new(http, endpoint));

    let root_cancel = CancellationToken::new();
    let view_registry = Arc::new(ViewRegistry::new(catalog_client, root_cancel.clone()));
    let engine = Arc::new(SubprocessEngine::new(config.driver.engine_binary.clone()));
    let store = Arc::new(StateStore::new(config));

    let controller = Controller::new(store, view_registry, engine, Vec::new(), root_cancel.clone());

    let once_mode = std::env::args().nth(1).as_deref() == Some("once");
    if once_mode {
        info!("running in once-mode");
        controller.once().await?;
        info!("once-mode complete");
        return Ok(());
    }

    tokio::spawn(async move {
        shutdown_signal().await;
        root_cancel.cancel();
    });

    info!("running as a daemon; press Ctrl+C to shut down");
    if let Err(e) = controller.run().await {
        error!(error = %e, "controller exited with an error");
        return Err(Box::new(e));
    }

    info!("shutdown complete");
    Ok(())
}

/// Builds the `reqwest` client used for every catalog request, loading
/// the CA bundle and optional client certificate once at startup.
fn build_http_client(catalog: &cts::config::CatalogConfig) -> Result<reqwest::Client, Box<dyn std::error::Error>> {
    let mut builder = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(catalog.wait_timeout_secs * 3));

    if let Some(tls) = &catalog.tls {
        let ca_bytes = std::fs::read(&tls.ca_path)?;
        let mut ca_reader = std::io::BufReader::new(ca_bytes.as_slice());
        for der in rustls_pemfile::certs(&mut ca_reader) {
            builder = builder.add_root_certificate(reqwest::Certificate::from_der(der?.as_ref())?);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) {
            let mut identity_pem = std::fs::read(cert_path)?;
            identity_pem.extend(std::fs::read(key_path)?);
            builder = builder.identity(reqwest::Identity::from_pem(&identity_pem)?);
        }
    }

    Ok(builder.build()?)
}

/// Listens for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}
