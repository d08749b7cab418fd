use event_bus::{retry::RetryConfig, BusPublisher, Publisher};
use outbox::{OutboxProcessor, PgOutboxStore, RetentionSweeper};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use outbox_relay::{
    bus::connect_bus,
    config::Config,
    db,
    metrics::RelayMetrics,
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        bus_type = ?config.bus_type,
        stream = %config.stream.name,
        subject_prefix = %config.stream.subject_prefix,
        port = config.port,
        "Configuration loaded"
    );

    let metrics = RelayMetrics::new()?;

    // DB + migrations (fail-fast)
    let pool = db::init_pool(&config).await?;
    db::run_migrations(&pool).await?;
    metrics.dep_up.with_label_values(&["db"]).set(1);

    let bus = connect_bus(&config).await?;
    let publisher: Arc<dyn Publisher> = Arc::new(
        BusPublisher::with_retry(
            bus.bus.clone(),
            config.stream.clone(),
            &RetryConfig {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(10),
            },
        )
        .await?,
    );
    metrics.dep_up.with_label_values(&["bus"]).set(1);

    let store = Arc::new(PgOutboxStore::new(pool.clone()).with_retry_policy(config.retry.clone()));
    let shutdown = CancellationToken::new();

    let processor = OutboxProcessor::new(store.clone(), publisher.clone(), config.processor())
        .with_metrics(metrics.outbox.clone())
        .spawn(shutdown.clone());

    let sweeper = RetentionSweeper::new(store, config.retention, config.cleanup_interval)
        .with_metrics(metrics.outbox.clone())
        .spawn(shutdown.clone());

    let state = Arc::new(AppState {
        pool: pool.clone(),
        nats: bus.nats.clone(),
        metrics,
    });
    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Let the current batch and sweep finish before releasing resources
    shutdown.cancel();
    if let Err(e) = processor.await {
        tracing::error!(error = %e, "Outbox processor task failed");
    }
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Retention sweeper task failed");
    }

    if let Err(e) = publisher.close().await {
        tracing::warn!(error = %e, "Failed to close publisher cleanly");
    }
    pool.close().await;
    tracing::info!("Outbox relay stopped");

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and cancels the background tasks
async fn shutdown_signal(shutdown: CancellationToken) {
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
