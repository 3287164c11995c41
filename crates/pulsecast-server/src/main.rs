//! Pulsecast - Campaign dispatch service entry point

use anyhow::{Context, Result};
use pulsecast_api::AppState;
use pulsecast_common::config::{Config, LoggingConfig};
use pulsecast_core::{
    Clock, DispatchEvent, Engine, EngineSettings, EvolutionGateway, PgJobQueue, Repositories,
    SystemClock, TrackedLinkShortener,
};
use pulsecast_storage::DatabasePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Pulsecast dispatch service...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    // Run migrations
    if config.database.run_migrations {
        db_pool.migrate().await?;
        info!("Database migrations completed");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repos = Repositories::postgres(db_pool.clone());
    let queue = Arc::new(
        PgJobQueue::new(db_pool.clone(), clock.clone())
            .with_stalled_after(Duration::from_secs(config.dispatch.stalled_after_secs)),
    );
    let gateway = Arc::new(
        EvolutionGateway::new(&config.gateway).context("Failed to build gateway client")?,
    );
    let links = Arc::new(TrackedLinkShortener::new(repos.links.clone(), &config.links));

    let engine = Engine::new(
        repos,
        queue,
        gateway,
        links.clone(),
        clock,
        EngineSettings::from_config(&config),
    )?;

    let shutdown = CancellationToken::new();

    // Start dispatch worker
    let worker_handle = {
        let worker = engine.worker();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    // Start campaign scheduler
    let scheduler_handle = {
        let scheduler = engine.scheduler();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    // Log dispatch events
    let events_handle = {
        let mut events = engine.events().subscribe();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event log fell behind, skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    // Start API server
    let api_handle = {
        let state = AppState {
            engine: engine.clone(),
            links,
            db_pool: Some(db_pool.clone()),
        };
        let app = pulsecast_api::create_router(state, &config.api.cors_origins);
        let addr = format!("{}:{}", config.server.bind_address, config.api.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server on {}", addr))?;
        info!("Starting API server on {}", addr);

        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!("API server error: {}", e);
            }
        })
    };

    info!("Pulsecast started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for (name, handle) in [
        ("worker", worker_handle),
        ("scheduler", scheduler_handle),
        ("events", events_handle),
        ("api", api_handle),
    ] {
        if let Err(e) = handle.await {
            error!("{} task ended abnormally: {}", name, e);
        }
    }

    info!("Pulsecast shutdown complete");

    Ok(())
}

fn log_event(event: &DispatchEvent) {
    match serde_json::to_string(event) {
        Ok(json) => debug!(campaign_id = %event.campaign_id(), "Dispatch event: {}", json),
        Err(e) => warn!("Failed to serialize dispatch event: {}", e),
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info,pulsecast=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
