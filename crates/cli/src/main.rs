use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::{collect, display};
use scanflow_core::config::{self, AppConfig};
use scanflow_core::pipeline::{self, PipelineSummary};
use scanflow_core::ScanOrchestrator;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            paths,
            exclude,
            hidden,
            simulate,
            backend_url,
            max_in_flight,
            json,
        } => {
            let mut cfg = cfg;
            if simulate {
                cfg.backend.provider = "mock".to_string();
            }
            if let Some(url) = backend_url {
                cfg.backend.base_url = url;
            }
            if max_in_flight.is_some() {
                cfg.orchestrator.max_in_flight = max_in_flight;
            }
            run_scan(cfg, paths, exclude, hidden, json).await
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Parser)]
#[command(name = "scanflow")]
#[command(about = "Submit files to a scanning backend and report the verdicts", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan files and directories
    Scan {
        /// Files or directories to submit
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Glob patterns to skip (comma-separated)
        #[arg(long, value_delimiter = ',', num_args = 1.., default_values_t = Vec::<String>::new())]
        exclude: Vec<String>,
        /// Include dotfiles and dot-directories when walking
        #[arg(long, default_value_t = false)]
        hidden: bool,
        /// Use the in-process simulated backend instead of the configured one
        #[arg(long, default_value_t = false)]
        simulate: bool,
        /// Override the backend base URL
        #[arg(long)]
        backend_url: Option<String>,
        /// Cap concurrent scans
        #[arg(long)]
        max_in_flight: Option<usize>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

async fn run_scan(
    cfg: AppConfig,
    paths: Vec<PathBuf>,
    exclude: Vec<String>,
    hidden: bool,
    json: bool,
) -> Result<ExitCode> {
    let files = collect::collect_paths(&paths, &exclude, hidden)?;
    if files.is_empty() {
        eprintln!("No files to scan.");
        return Ok(ExitCode::SUCCESS);
    }
    let uploads = collect::read_uploads(&files).await?;
    let orchestrator = pipeline::build_orchestrator(&cfg).context("orchestrator setup")?;

    let progress = (!json).then(|| tokio::spawn(report_progress(orchestrator.clone())));
    let summary = pipeline::run_uploads(&orchestrator, uploads).await;
    if let Some(handle) = progress {
        handle.abort();
    }

    let records = orchestrator.snapshot();
    if json {
        let out = serde_json::json!({ "summary": summary, "records": records });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", display::render_table(&records));
        println!("{}", summary_line(&summary));
    }

    Ok(if summary.suspicious > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

/// Prints a line to stderr whenever a record settles.
async fn report_progress(orchestrator: ScanOrchestrator) {
    let mut changes = orchestrator.subscribe();
    let mut reported = HashSet::new();
    loop {
        for record in orchestrator.snapshot().iter().rev() {
            if record.status().is_terminal() && reported.insert(record.id()) {
                eprintln!("{}", display::progress_line(record));
            }
        }
        if changes.changed().await.is_err() {
            break;
        }
    }
}

fn summary_line(summary: &PipelineSummary) -> String {
    format!(
        "{} scanned: {} clean, {} suspicious, {} failed",
        summary.submitted, summary.clean, summary.suspicious, summary.failed
    )
}
