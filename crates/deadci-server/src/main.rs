//! DeadCI server

use anyhow::Context;
use clap::Parser;
use deadci_config::DeadciConfig;
use deadci_db::{EventStore, SqliteEventStore, create_pool, run_migrations};
use deadci_executor::JobExecutor;
use deadci_reporter::{GitHubReporter, ReporterRegistry};
use deadci_scheduler::{Dispatcher, Intake, WorkerPool};
use deadci_server::shutdown::{escalate, interrupted};
use deadci_server::{AppState, Cli, routes};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Notifications buffered between the webhook receiver and intake.
const NOTIFICATION_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config_path();
    let config = DeadciConfig::load(&config_path).with_context(|| {
        format!(
            "failed to load configuration from {}",
            config_path.display()
        )
    })?;
    let config = Arc::new(config);

    info!("Opening event database...");
    let pool = create_pool(&cli.database_url())
        .await
        .context("failed to open event database")?;
    run_migrations(&pool)
        .await
        .context("failed to migrate event database")?;
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool));
    store.recover_interrupted().await?;

    let mut registry = ReporterRegistry::new();
    if config.github.enabled {
        registry.register(Arc::new(GitHubReporter::new(config.clone())));
    }
    let executor = Arc::new(JobExecutor::new(config.clone(), store.clone()));
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(registry),
        executor,
        config.max_concurrent_jobs,
    );

    let workers = WorkerPool::spawn(config.workers, dispatcher.clone(), config.poll_interval);

    let intake = Arc::new(Intake::new(dispatcher));
    let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let intake_loop = {
        let intake = intake.clone();
        tokio::spawn(async move { intake.run(rx).await })
    };

    let state = AppState::new(config.clone(), store, intake, tx);
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    if config.github.enabled {
        info!(
            "GitHub webhook URL: http://{}:{}/postreceive",
            config.host, config.port
        );
    }
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    let serve_and_drain = async {
        let graceful = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await?;

        info!("Draining running builds; interrupt again to exit immediately");
        // The router held the only sender, so intake stops once delivered notifications are handled.
        let _ = intake_loop.await;
        workers.drain().await?;
        anyhow::Ok(())
    };

    tokio::select! {
        result = serve_and_drain => result?,
        _ = escalate(&shutdown, interrupted) => warn!("Exiting without waiting for running builds"),
    }

    Ok(())
}
