//! LingoForge query trigger
//!
//! Reads a query payload, runs the query pipeline and writes the structured
//! result to stdout. Logs go to stderr.
//!
//! Usage:
//!   query ask [--file request.json]          QueryRequest JSON (stdin by default)
//!   query feedback --response-id ID TEXT     Record feedback on an answer
//!   query config                             Effective model configuration
//!   query materials [--language L] [--type T] [--limit N] [--next-token TOKEN]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lingoforge_common::{
    config::{AppConfig, ObservabilityConfig},
    db::{PageRequest, ScanFilter},
    errors::ErrorResponse,
    tutor::{FeedbackRequest, QueryRequest, TutorServices},
    AppError, VERSION,
};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Caller mistakes exit with 2, everything else with 1
const EXIT_CALLER_ERROR: i32 = 2;
const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "query", version, about = "Answer language-learning questions with retrieved context")]
struct Cli {
    /// Configuration file (defaults to config/ plus APP__ environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use in-process index, store and model
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one query
    Ask {
        /// Read the request from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Record feedback on an earlier answer
    Feedback {
        /// Interaction id returned with the answer
        #[arg(long)]
        response_id: String,

        #[arg(long)]
        student_id: Option<String>,

        /// 1 to 5
        #[arg(long)]
        rating: Option<u8>,

        feedback: String,
    },

    /// Print the model defaults the pipeline applies
    Config,

    /// List stored learning material
    Materials {
        #[arg(long)]
        language: Option<String>,

        #[arg(long = "type")]
        kind: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long)]
        next_token: Option<String>,
    },
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
        .with_writer(std::io::stderr)
        .with_target(true);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_request(file: Option<&PathBuf>) -> Result<QueryRequest> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("Request is not a valid query payload")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the error body and exit with a code the caller can branch on
fn fail(err: AppError) -> ! {
    error!(error = %err, code = err.code().as_code(), "Request failed");
    if let Ok(body) = serde_json::to_string_pretty(&ErrorResponse::from(&err)) {
        println!("{}", body);
    }
    let code = if err.is_caller_error() {
        EXIT_CALLER_ERROR
    } else {
        EXIT_FAILURE
    };
    std::process::exit(code)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.observability);

    info!(version = VERSION, service = %config.observability.service_name, "Starting LingoForge query");

    let services = TutorServices::from_config(&config)
        .await
        .context("Failed to initialize tutor services")?;

    match cli.command {
        Commands::Ask { file } => {
            let request = read_request(file.as_ref())?;
            match services.pipeline.answer(request).await {
                Ok(response) => print_json(&response)?,
                Err(e) => fail(e),
            }
        }
        Commands::Feedback {
            response_id,
            student_id,
            rating,
            feedback,
        } => {
            let request = FeedbackRequest {
                feedback,
                response_id,
                student_id,
                rating,
            };
            match services.pipeline.record_feedback(request).await {
                Ok(entry) => print_json(&entry)?,
                Err(e) => fail(e),
            }
        }
        Commands::Config => print_json(services.pipeline.model_settings())?,
        Commands::Materials {
            language,
            kind,
            limit,
            next_token,
        } => {
            let filter = ScanFilter { language, kind };
            let page = PageRequest { limit, next_token };
            match services.pipeline.list_materials(&filter, &page).await {
                Ok(page) => print_json(&page)?,
                Err(e) => fail(e),
            }
        }
    }

    Ok(())
}
