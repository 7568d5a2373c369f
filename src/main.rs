//! CLI entry point for the forecast provider rater.
//!
//! Provides subcommands for composing the multi-run comparative report,
//! validating run files, and appending a run to the central metric log.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use forecast_rater::analyzers::analyzer::analyze_path;
use forecast_rater::{
    config::RaterConfig,
    ingest::{Ingestor, read_table},
    output::{append_records, print_json, print_pretty, write_report_artifacts},
    report::render_markdown,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "forecast_rater")]
#[command(
    about = "Aggregate and rank weather forecast providers against reanalysis metrics",
    long_about = None
)]
struct Cli {
    /// JSON config file (falls back to RATER_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose the comparative report from a directory of run summaries or a metric log
    Report {
        /// Directory of run summary CSVs, or a single log file
        #[arg(value_name = "DIR_OR_FILE", default_value = "wyniki")]
        source: PathBuf,

        /// Directory to write the report and CSV artifacts into
        #[arg(short, long, default_value = "wyniki/analysis_history")]
        output_dir: PathBuf,

        /// |bias_median| below this is reported as neutral
        #[arg(long)]
        bias_epsilon: Option<f64>,

        /// Maximum number of run files read concurrently
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Comma-separated variables to keep ("all" keeps every variable)
        #[arg(long, value_delimiter = ',')]
        variables: Option<Vec<String>>,

        /// Also write the full report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Ingest run files and report malformed, duplicate and suspicious rows
    Validate {
        /// Directory of run summary CSVs, or a single file
        #[arg(value_name = "DIR_OR_FILE")]
        source: PathBuf,

        /// Fail when anything was rejected or flagged
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Append one run summary to the central metric log
    Append {
        /// Run summary CSV (or .csv.gz)
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Central metric log to append to
        #[arg(short, long, default_value = "central_metric_log.csv")]
        log: PathBuf,

        /// Run id to use instead of the one derived from the file name
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/forecast_rater.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("forecast_rater.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = RaterConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Report {
            source,
            output_dir,
            bias_epsilon,
            concurrency,
            variables,
            json,
        } => {
            if let Some(epsilon) = bias_epsilon {
                config.bias_epsilon = epsilon;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            if let Some(variables) = variables {
                config.variables = if variables.iter().any(|v| v == "all") {
                    Vec::new()
                } else {
                    variables
                };
            }

            let analysis = analyze_path(&source, &config).await?;
            let markdown = render_markdown(&analysis.report);
            print_pretty(&analysis.report);

            write_report_artifacts(
                &output_dir,
                &analysis.records,
                &analysis.report,
                &markdown,
                json,
            )?;

            for entry in &analysis.report.overall.entries {
                info!(
                    rank = entry.rank,
                    provider = %entry.provider,
                    median_of_medians_rmse = ?entry.median_of_medians_rmse,
                    "Overall ranking"
                );
            }
        }
        Commands::Validate { source, strict } => {
            let analysis = analyze_path(&source, &config).await?;
            let validation = &analysis.report.validation;
            print_json(validation)?;

            if strict && !validation.is_clean() {
                bail!(
                    "validation failed: {} malformed, {} duplicates, {} warnings, {} unreadable",
                    validation.malformed_count(),
                    validation.duplicate_count(),
                    validation.warnings.len(),
                    validation.unreadable.len()
                );
            }
        }
        Commands::Append {
            source,
            log,
            run_id,
        } => {
            append_run(&source, &log, run_id, &config)?;
        }
    }

    Ok(())
}

/// Validates one run file and appends its accepted records to the central
/// log, rejecting triples the log already holds.
#[tracing::instrument(skip(source, log, config), fields(source = %source.display(), log = %log.display()))]
fn append_run(
    source: &Path,
    log: &Path,
    run_id: Option<String>,
    config: &RaterConfig,
) -> Result<()> {
    let mut table = read_table(source)?;
    if let Some(run_id) = run_id {
        table.run_id = run_id;
    }

    let known = if log.exists() {
        let existing = read_table(log)?;
        let mut ingestor = Ingestor::new(config);
        ingestor.ingest_table(&existing);
        ingestor
            .finish()
            .records
            .iter()
            .map(|r| r.key())
            .collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    let mut ingestor = Ingestor::new(config).with_known_keys(known);
    ingestor.ingest_table(&table);
    let ingested = ingestor.finish();

    if ingested.report.duplicate_count() > 0 {
        warn!(
            duplicates = ingested.report.duplicate_count(),
            "Rows already present in the log were skipped"
        );
    }

    let appended = append_records(log, &ingested.records)?;
    info!(
        appended,
        run_id = %table.run_id,
        rejected = ingested.report.rejected.len(),
        "Run appended to central log"
    );
    Ok(())
}
