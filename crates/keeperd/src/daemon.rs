//! Daemon lifecycle: config checks, storage, crypto services, metrics, gRPC server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use keeper_core::config::KeeperConfig;
use keeper_crypto::{CredentialVerifier, FieldCipher, HashParams, TokenService};
use keeper_storage::SqliteStore;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::handlers::AppContext;
use crate::metrics::{HealthState, Metrics};

/// Build every collaborator from `config`. Shared by the daemon and tests.
pub fn build_context<S>(
    config: &KeeperConfig,
    store: Arc<S>,
    metrics: Metrics,
) -> Result<AppContext<S>> {
    let cipher = FieldCipher::from_hex(&config.crypto.field_key).context("loading crypto.field_key")?;
    let verifier = CredentialVerifier::new(
        &config.auth.password_salt,
        &HashParams {
            mem_cost_kib: config.auth.argon2_mem_cost_kib,
            time_cost: config.auth.argon2_time_cost,
            parallelism: config.auth.argon2_parallelism,
        },
    )
    .context("configuring password hashing")?;
    let tokens = TokenService::new(
        &config.auth.token_secret,
        Duration::from_secs(config.auth.token_ttl_secs),
    );

    Ok(AppContext {
        store,
        cipher,
        verifier,
        tokens: Arc::new(tokens),
        metrics,
    })
}

pub async fn run(config: KeeperConfig) -> Result<()> {
    info!("daemon starting");

    config.validate().context("invalid configuration")?;
    if config.uses_insecure_defaults() {
        warn!("running with built-in development secrets; do not use in production");
    }

    let store = SqliteStore::open(&config.storage)
        .await
        .with_context(|| format!("opening database {}", config.storage.database_url))?;
    let store = Arc::new(store);
    info!(url = %config.storage.database_url, "storage: connected");

    // Start Prometheus metrics endpoint
    let mut registry = Registry::default();
    let metrics = Metrics::register(&mut registry);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            store: store.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let ctx = Arc::new(build_context(&config, store.clone(), metrics)?);

    let listener = TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;
    info!(listen = %config.daemon.listen, "gRPC: listening");

    crate::grpc::serve(listener, ctx, shutdown_signal()).await?;

    store.close().await;
    info!("daemon stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("registering SIGINT handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("registering SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining");
}
