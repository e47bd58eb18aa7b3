//! SIEM detection pipeline - main entry point.
//!
//! Two roles share one binary: the ingest API server and the stream-consuming
//! worker. Both build their shared handles once at startup.

use anyhow::Result;
use clap::{Parser, Subcommand};
use siem_detection_pipeline::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Aegis SIEM detection pipeline
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log format (json, pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingest API server
    Server {
        /// Bind address, e.g. 0.0.0.0:8000 (overrides BIND_ADDRESS)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Start a pipeline worker
    Worker {
        /// Consumer name within the ingest group
        #[arg(long, default_value = "worker_1")]
        consumer: String,
    },
}

fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "siem_detection_pipeline={},tower_http=warn",
            level
        ))
    });
    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format);

    let settings = Arc::new(Settings::from_env());
    info!("Starting {} v{}", settings.project_name, env!("CARGO_PKG_VERSION"));
    info!("Redis URL: {}", settings.redis_url);
    info!("Elasticsearch URL: {}", settings.elasticsearch_url);

    match cli.command {
        Commands::Server { bind } => run_server(settings, bind).await,
        Commands::Worker { consumer } => run_worker(settings, consumer).await,
    }
}

async fn run_server(settings: Arc<Settings>, bind: Option<String>) -> Result<()> {
    let store: Arc<dyn StateStore> = Arc::new(RedisStateStore::connect(&settings.redis_url).await?);
    let queue = Arc::new(EventQueue::new(store.clone()));
    let index = Arc::new(EventIndex::new(&settings.elasticsearch_url));
    let metrics = Arc::new(PipelineMetrics::new());

    let state = AppState {
        settings: settings.clone(),
        store,
        queue,
        index,
        metrics,
    };
    let app = build_router(state);

    let bind_address = bind.unwrap_or_else(|| settings.bind_address.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Ingest API listening on {}", bind_address);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!("Server failed: {}", e);
        }
    });

    wait_for_shutdown().await;
    server.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn run_worker(settings: Arc<Settings>, consumer: String) -> Result<()> {
    let store: Arc<dyn StateStore> = Arc::new(RedisStateStore::connect(&settings.redis_url).await?);
    let queue = Arc::new(EventQueue::new(store.clone()));
    let index = Arc::new(EventIndex::new(&settings.elasticsearch_url));
    let metrics = Arc::new(PipelineMetrics::new());

    let rules_config = RulesConfig::load(&settings.rules_config_path)?;
    let response_config = ResponseConfig::load(&settings.response_config_path)?;
    info!(
        "Detection config loaded (brute-force window {}s, threshold {})",
        rules_config.rules.ssh_brute_force.window_seconds,
        rules_config.rules.ssh_brute_force.threshold
    );

    let enricher = Arc::new(Enricher::new(&settings));
    let rules = RuleEngine::new(store.clone(), rules_config.rules);
    let scorer = AnomalyScorer::load(store.clone(), &settings.model_path);
    let correlator = Correlator::new(store.clone());
    let responder = Responder::new(store.clone(), &response_config);

    let worker = WorkerPipeline::new(
        consumer,
        queue,
        index,
        enricher,
        rules,
        scorer,
        correlator,
        responder,
        metrics.clone(),
    );

    // Periodic metrics snapshot, mirroring what the API exposes over HTTP.
    let metrics_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let snapshot = metrics.snapshot();
            info!(
                "Metrics: {} processed, {} indexed, {} alerts, {} incidents, {} errors, {} dead-lettered",
                snapshot.processed,
                snapshot.indexed,
                snapshot.alerts,
                snapshot.incidents,
                snapshot.errors,
                snapshot.dead_lettered
            );
        }
    });

    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            error!("Worker terminated: {}", e);
        }
    });

    wait_for_shutdown().await;
    worker_handle.abort();
    metrics_handle.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, shutting down..."),
        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
    }
}
