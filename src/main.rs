//! NameStats worker binary. Drains the ingestion job queue.
//!
//! Wires configuration, logging, the database, storage and the parser
//! registry together and runs the worker pool until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt};

use namestats_core::config::AppConfig;
use namestats_database::DatabasePool;
use namestats_ingest::ParserRegistry;
use namestats_storage::LocalStorageProvider;
use namestats_worker::{DatasetProcessor, JobQueue, ProcessorDeps, RetryPolicy, WorkerPool};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Worker error: {:#}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> anyhow::Result<AppConfig> {
    match std::env::var("NAMESTATS_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)
            .with_context(|| format!("loading configuration file '{path}'")),
        Err(_) => {
            let env =
                std::env::var("NAMESTATS_ENV").unwrap_or_else(|_| "development".to_string());
            AppConfig::load(&env).with_context(|| format!("loading '{env}' configuration"))
        }
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main worker run function
async fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting NameStats worker v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Database connection + migrations ─────────────────
    let db_pool = DatabasePool::connect(&config.database)
        .await
        .context("database connection failed")?;
    namestats_database::migration::run_migrations(db_pool.pool())
        .await
        .context("migration failed")?;

    // ── Step 2: Storage and parsers ──────────────────────────────
    let storage = LocalStorageProvider::new(&config.storage.local_root)
        .await
        .context("storage init failed")?;
    let registry =
        ParserRegistry::with_builtin(&config.ingest).context("parser registration failed")?;
    tracing::info!("Parsers registered for: {}", registry.source_ids().join(", "));

    // ── Step 3: Queue and processor ──────────────────────────────
    let queue = JobQueue::new(
        Arc::new(db_pool.jobs()),
        config.worker.max_attempts,
    );
    queue
        .release_stale(Duration::from_secs(config.worker.stale_lock_seconds))
        .await
        .context("stale lock recovery failed")?;

    let processor = Arc::new(DatasetProcessor::new(
        ProcessorDeps {
            queue,
            datasets: Arc::new(db_pool.datasets()),
            counts: Arc::new(db_pool.name_counts()),
            storage: Arc::new(storage),
            registry: Arc::new(registry),
        },
        config.ingest.normalizer.clone(),
        config.ingest.batch_size,
        RetryPolicy::from_config(&config.worker),
    ));

    if !config.worker.enabled {
        tracing::warn!("Worker pool disabled by configuration, exiting");
        db_pool.close().await;
        return Ok(());
    }

    // ── Step 4: Run until Ctrl+C ─────────────────────────────────
    let mut pool = WorkerPool::new(processor, config.worker.clone());
    pool.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    pool.shutdown().await;
    db_pool.close().await;
    tracing::info!("NameStats worker stopped");
    Ok(())
}
