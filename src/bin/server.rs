// Main entry point for the admission gateway server.

use std::sync::Arc;

use admission_core::config::Config;
use admission_core::kernel::admission::AdmissionController;
use admission_core::kernel::expiry_listener::ExpiryListener;
use admission_core::kernel::job_status::JobStatusStore;
use admission_core::kernel::runner::{JobRunner, JobRunnerConfig};
use admission_core::kernel::store::RedisStoreClient;
use admission_core::kernel::sweeper::{SweepTargets, Sweeper};
use admission_core::server::app::{build_app, AppState};
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,admission_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting admission gateway");

    let config = Config::from_env().context("failed to load configuration")?;
    tracing::info!(port = config.port, "configuration loaded");

    let store = Arc::new(
        RedisStoreClient::connect(&config.redis_url, config.store_call_timeout)
            .await
            .context("failed to connect to shared store")?,
    );
    tracing::info!("connected to shared store");

    let sweep_targets = Arc::new(SweepTargets::new());
    let admission = Arc::new(
        AdmissionController::new(store.clone(), config.tiers.clone(), config.safety_key_ttl)
            .with_sweep_targets(sweep_targets.clone()),
    );
    let status_store = Arc::new(JobStatusStore::new(store.clone()));
    let runner = Arc::new(JobRunner::new(
        admission.clone(),
        status_store.clone(),
        JobRunnerConfig {
            worker_pool_size: config.worker_pool_size,
            progress_interval: config.progress_interval,
        },
    ));

    let listener = ExpiryListener::new(store.clone());
    tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            tracing::error!(error = %e, "expiry listener exited");
        }
    });

    let sweeper = Sweeper::new(store.clone(), sweep_targets, config.sweep_interval);
    tokio::spawn(sweeper.run());

    let state = AppState {
        admission,
        runner,
        status_store,
        store: store.clone(),
    };
    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(addr, "binding server");
    let tcp_listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    axum::serve(tcp_listener, app)
        .await
        .context("server error")?;

    Ok(())
}
