//! Forecast tile importer service.
//!
//! Runs the daily import triggers, the retention janitor and the status API.
//! Trailing `DATE CYCLE` pairs queue backfill jobs; with `--once` only the
//! backfill runs and the process exits once every tile is written.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use field_decoder::GribFieldDecoder;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use importer::backfill;
use importer::download::{ProviderFetcher, Retriever};
use importer::ecmwf::EcmwfClient;
use importer::janitor;
use importer::logging::init_logging;
use importer::pipeline::Pipeline;
use importer::scheduler::{spawn_job, Scheduler};
use importer::server::{self, ServerState};
use importer::state::JobStore;
use importer::tiles::{GdalTiler, TilePool};
use importer::{ImporterConfig, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "importer")]
#[command(about = "Forecast tile importer for GFS and ECMWF open data")]
struct Args {
    /// Configuration file
    #[arg(long, env = "IMPORTER_CONFIG", default_value = "config/importer.yaml")]
    config: PathBuf,

    /// Process the backfill pairs, wait for tiling and exit
    #[arg(long)]
    once: bool,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Port for status HTTP server
    #[arg(long, env = "STATUS_PORT", default_value = "8082")]
    status_port: u16,

    /// Disable status HTTP server
    #[arg(long)]
    no_status_server: bool,

    /// Backfill requests as `YYYYMMDD CYCLE` pairs
    #[arg(value_name = "DATE CYCLE")]
    pairs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = Arc::new(ImporterConfig::load_or_default(&args.config)?);

    let _log_guard = init_logging(&config.log_dir, &args.log_level)
        .with_context(|| format!("Failed to set up logging in {}", config.log_dir.display()))?;

    info!(config = %args.config.display(), "Starting forecast importer");

    let metrics_handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };

    let issuances = match backfill::parse_pairs(&args.pairs) {
        Ok(issuances) => issuances,
        Err(e) => {
            error!(error = %e, "Invalid backfill arguments");
            return Ok(());
        }
    };

    for dir in [&config.tiles_path, &config.temp_dir, &config.state_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    // No job runs yet, so anything left in the scratch directory is abandoned.
    janitor::clear_staging(&config.temp_dir);

    let store = Arc::new(JobStore::open(&config.job_db_path()).await?);
    let recovered = store.recover_interrupted(chrono::Utc::now()).await?;
    if recovered > 0 {
        warn!(count = recovered, "Re-armed jobs interrupted by a previous run");
    }

    let retriever = Arc::new(Retriever::new(config.download.clone())?);
    let fetcher = Arc::new(ProviderFetcher::new(
        retriever,
        EcmwfClient::new(config.ecmwf_url.clone()),
    ));
    let pipeline = Pipeline::new(
        fetcher,
        Arc::new(GribFieldDecoder::new()),
        config.temp_dir.clone(),
        config.tiles_path.clone(),
    );
    let pool = Arc::new(TilePool::new(
        Arc::new(GdalTiler::new(config.tiler.clone())),
        config.tiler.worker_count(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        store.clone(),
        pipeline,
        pool.clone(),
    ));

    let jobs = backfill::jobs(&issuances, &config.enabled_models());

    if args.once {
        info!(jobs = jobs.len(), "Running backfill");
        for key in jobs {
            match orchestrator.launch(key).await {
                Ok(outcome) => info!(job = %key, outcome = ?outcome, "Backfill job finished"),
                Err(e) => error!(job = %key, error = %e, "Backfill job failed"),
            }
        }
        info!(in_flight = pool.in_flight(), "Waiting for tile generation");
        pool.drain().await;
    } else {
        if !args.no_status_server {
            let server_state = Arc::new(ServerState {
                config: config.clone(),
                store: store.clone(),
                pool: pool.clone(),
                metrics: metrics_handle,
            });
            let status_port = args.status_port;
            tokio::spawn(async move {
                if let Err(e) = server::run_server(server_state, status_port).await {
                    error!(error = %e, "Status server failed");
                }
            });
        }

        for key in jobs {
            spawn_job(orchestrator.clone(), key);
        }

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            shutdown_tx_clone.send(()).ok();
        });

        Scheduler::new(orchestrator).run_forever(shutdown_tx.subscribe()).await?;

        let limit = config.tiler.drain_timeout();
        info!(
            in_flight = pool.in_flight(),
            timeout_secs = limit.as_secs(),
            "Waiting for tile generation"
        );
        if !pool.drain_timeout(limit).await {
            warn!(
                in_flight = pool.in_flight(),
                "Tile generation still running at shutdown; staging files are cleared on next start"
            );
        }
    }

    let stats = store.stats().await?;
    info!(
        running = stats.running,
        succeeded = stats.succeeded,
        scheduled_retry = stats.scheduled_retry,
        scheduled_long_retry = stats.scheduled_long_retry,
        "Importer stopped"
    );

    Ok(())
}
