//! LingoForge Indexer
//!
//! Write side of the tutor:
//! - `worker`: long-poll the ingest queue and index each job
//! - `ingest <file>`: index a JSON document list now (or queue it with
//!   `--async`). Re-running with the same ids repairs a partial ingest.
//! - `remove <id>`: delete a document from the vector index and the
//!   metadata store

mod worker;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lingoforge_common::{
    config::{AppConfig, ObservabilityConfig},
    db::models::NewDocument,
    metrics::{register_metrics, LATENCY_BUCKETS, METRICS_PREFIX, MODEL_BUCKETS},
    queue::{IngestJob, Queue},
    tutor::{IngestDispatcher, QueueDispatcher, TutorServices},
    AppError, VERSION,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "indexer", version, about = "Index learning material for retrieval")]
struct Cli {
    /// Configuration file (defaults to config/ plus APP__ environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use in-process index and store
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process ingest jobs from the queue until ctrl-c
    Worker,

    /// Ingest documents from a JSON file
    Ingest {
        file: PathBuf,

        /// Vector namespace (defaults to vector_index.default_namespace)
        #[arg(long)]
        namespace: Option<String>,

        /// Queue the job for the worker instead of ingesting here
        #[arg(long = "async")]
        queued: bool,
    },

    /// Remove one document
    Remove {
        id: String,

        #[arg(long)]
        namespace: Option<String>,
    },
}

/// Accepted ingest file shapes: a bare document list, or a list with a namespace
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IngestFile {
    Documents(Vec<NewDocument>),
    Batch {
        documents: Vec<NewDocument>,
        #[serde(default)]
        namespace: Option<String>,
    },
}

impl IngestFile {
    fn into_parts(self) -> (Vec<NewDocument>, Option<String>) {
        match self {
            IngestFile::Documents(documents) => (documents, None),
            IngestFile::Batch { documents, namespace } => (documents, namespace),
        }
    }
}

fn read_documents(path: &Path) -> Result<(Vec<NewDocument>, Option<String>)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: IngestFile = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a document list", path.display()))?;
    Ok(file.into_parts())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    if cli.local {
        return Ok(AppConfig::local());
    }
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(&path.to_string_lossy()),
        None => AppConfig::load(),
    };
    config.context("Failed to load configuration")
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve `/metrics` on the configured port; port 0 turns it off
fn init_metrics(observability: &ObservabilityConfig) -> Result<()> {
    if observability.metrics_port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_model_duration_seconds", METRICS_PREFIX)),
            MODEL_BUCKETS,
        )?
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), LATENCY_BUCKETS)?
        .install()
        .context("Failed to install Prometheus exporter")?;
    register_metrics();

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.observability);

    info!(version = VERSION, service = %config.observability.service_name, "Starting LingoForge indexer");

    let services = TutorServices::from_config(&config)
        .await
        .context("Failed to initialize tutor services")?;

    match cli.command {
        Commands::Worker => {
            init_metrics(&config.observability)?;

            if config.queue.ingest_queue_url.is_none() {
                warn!("queue.ingest_queue_url not set, waiting for shutdown signal");
                tokio::signal::ctrl_c().await?;
                info!("Indexer shutting down");
                return Ok(());
            }
            let queue = Queue::from_config(&config.queue).await?;
            worker::run(queue, Arc::clone(&services.indexer)).await?;
        }
        Commands::Ingest {
            file,
            namespace,
            queued,
        } => {
            let (documents, file_namespace) = read_documents(&file)?;
            let namespace = namespace.or(file_namespace);

            if queued {
                let queue = Arc::new(Queue::from_config(&config.queue).await?);
                let job = IngestJob::new(documents, namespace);
                let job_id = job.job_id;
                QueueDispatcher::new(queue).dispatch(job).await?;
                println!("{}", serde_json::json!({ "job_id": job_id, "status": "queued" }));
            } else {
                match services.indexer.ingest(documents, namespace.as_deref()).await {
                    Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                    Err(e) => exit_with(e),
                }
            }
        }
        Commands::Remove { id, namespace } => {
            match services.indexer.remove(&id, namespace.as_deref()).await {
                Ok(existed) => println!("{}", serde_json::json!({ "id": id, "removed": existed })),
                Err(e) => exit_with(e),
            }
        }
    }

    Ok(())
}

fn exit_with(err: AppError) -> ! {
    if let AppError::Inconsistent { ids, .. } = &err {
        // Same ids, same command: both stores replace by id
        error!(ids = ?ids, "Stores disagree; re-run with the same ids to repair");
    } else {
        error!(error = %err, "Indexer command failed");
    }
    eprintln!("Error: {}", err);
    std::process::exit(if err.is_caller_error() { 2 } else { 1 })
}
