//! Sequence Flow: drip email sequences over a REST API.
//!
//! Main entry point that wires the store, delivery, drip scheduling and the
//! HTTP server, then serves until Ctrl-C.

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use sequence_api::{ApiServer, AppState};
use sequence_channels::{OutboxSender, RetryPolicy, RetryingSender};
use sequence_core::config::{AppConfig, SchedulerMode};
use sequence_core::event_bus::TracingSink;
use sequence_drip::{DripEngine, DripScheduler, RunRegistry, RunTrigger, StaticRecipients};
use sequence_store::{MemoryRunStore, MemoryStore, SequenceService, StepService};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    InProcess,
    Durable,
}

impl From<ModeArg> for SchedulerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::InProcess => SchedulerMode::InProcess,
            ModeArg::Durable => SchedulerMode::Durable,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sequence-flow")]
#[command(about = "Drip email sequences: ordered steps with whole-day waits")]
#[command(version)]
struct Cli {
    /// Config file path without extension (YAML, TOML or JSON)
    #[arg(long, env = "SEQUENCE_FLOW_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "SEQUENCE_FLOW__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "SEQUENCE_FLOW__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "SEQUENCE_FLOW__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// How drip runs are driven (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Real-time seconds per `waitDays` unit, for staging environments
    #[arg(long)]
    seconds_per_day: Option<u64>,

    /// Disable the Prometheus exporter
    #[arg(long, default_value_t = false)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sequence_flow=info,sequence_drip=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Sequence Flow starting up");

    // Load configuration
    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(mode) = cli.mode {
        config.scheduler.mode = mode.into();
    }
    if let Some(seconds) = cli.seconds_per_day {
        config.scheduler.seconds_per_day = seconds;
    }
    if cli.no_metrics {
        config.metrics.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        mode = ?config.scheduler.mode,
        recipients = config.delivery.recipients.len(),
        "Configuration loaded"
    );

    // In-memory tables; swap for a relational store in production.
    let store = Arc::new(MemoryStore::new());

    let sender = Arc::new(RetryingSender::new(
        OutboxSender::with_capacity(
            config.delivery.sender_email.clone(),
            config.delivery.outbox_capacity,
        ),
        RetryPolicy::from(&config.delivery.retry),
    ));
    let recipients = Arc::new(StaticRecipients::new(config.delivery.recipients.clone()));
    let engine = DripEngine::new(store.clone(), sender, recipients)
        .with_event_sink(Arc::new(TracingSink))
        .with_max_concurrent_sends(config.scheduler.max_concurrent_sends)
        .with_day_length(config.scheduler.day_length());

    let shutdown = CancellationToken::new();

    let (runs, background): (Arc<dyn RunTrigger>, JoinHandle<()>) = match config.scheduler.mode {
        SchedulerMode::InProcess => {
            let registry = RunRegistry::new(engine, config.scheduler.max_concurrent_runs);
            // Finished-run maintenance until shutdown, then cancel what is left.
            let handle = tokio::spawn({
                let registry = registry.clone();
                let shutdown = shutdown.clone();
                let interval = config.scheduler.maintenance_interval();
                let retention = config.scheduler.run_retention();
                async move {
                    registry.run_maintenance(interval, retention, shutdown).await;
                    registry.shutdown();
                }
            });
            let runs: Arc<dyn RunTrigger> = Arc::new(registry);
            (runs, handle)
        }
        SchedulerMode::Durable => {
            let scheduler = DripScheduler::new(engine, Arc::new(MemoryRunStore::new()))
                .with_max_concurrent_runs(config.scheduler.max_concurrent_runs);
            let handle = tokio::spawn({
                let scheduler = scheduler.clone();
                let shutdown = shutdown.clone();
                let interval = config.scheduler.poll_interval();
                async move { scheduler.run(interval, shutdown).await }
            });
            let runs: Arc<dyn RunTrigger> = Arc::new(scheduler);
            (runs, handle)
        }
    };

    let state = AppState {
        sequences: SequenceService::new(store.clone()),
        steps: StepService::new(store),
        runs,
        node_id: config.node_id.clone(),
        version: config.version.clone(),
        start_time: Instant::now(),
    };
    let api_server = ApiServer::new(config.clone(), state);

    // Start metrics exporter
    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    info!("Sequence Flow is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    let served = api_server.start_http(shutdown.clone().cancelled_owned()).await;
    shutdown.cancel();
    if let Err(e) = background.await {
        error!(error = %e, "Scheduler task ended abnormally");
    }
    served?;

    info!("Sequence Flow stopped");
    Ok(())
}
