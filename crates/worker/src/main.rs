use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use easel_events::{BusNotifier, EventBus};
use easel_worker::http_generation::HttpGenerationClient;
use easel_worker::{EngineConfig, JobEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "easel_worker=debug,easel_db=info".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        replica_id = %config.replica_id,
        concurrency = config.concurrency,
        generation_timeout_secs = config.generation_timeout.as_secs(),
        "Loaded engine configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = easel_db::create_pool(&database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    easel_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    easel_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let notifier = Arc::new(BusNotifier::new(Arc::clone(&event_bus)));

    // --- Generation collaborator ---
    let generation_url = std::env::var("GENERATION_URL").context("GENERATION_URL must be set")?;
    let generation = Arc::new(
        HttpGenerationClient::new(generation_url).context("Failed to build HTTP client")?,
    );
    tracing::info!(endpoint = %generation.endpoint(), "Generation client ready");

    // --- Engine ---
    let engine = JobEngine::new(pool.clone(), config, generation, notifier);
    let handle = engine.start();

    shutdown_signal().await;

    let drained = handle.shutdown().await;
    if !drained {
        tracing::warn!("Some executions did not finish; their claims will be recovered later");
    }

    drop(event_bus);
    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
