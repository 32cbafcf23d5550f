//! VisionFlow - Command-line Entry Point
//!
//! Builds a pipeline from a TOML or JSON file, runs it until every stage has
//! stopped and reports the errors that occurred.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use visionflow::{PipelineBuilder, PipelineConfig, RuntimeSettings, StageRegistry};

#[derive(Debug, Parser)]
#[command(name = "visionflow", version, about = "Run a VisionFlow pipeline")]
struct Cli {
    /// Pipeline file (.toml or .json)
    pipeline: PathBuf,

    /// Settings file (defaults to settings.toml in the app data directory)
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Interrupt the run after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Install the console logger and, when configured, a daily log file.
///
/// The returned guard flushes the file writer and must outlive the run.
fn init_logging(settings: &RuntimeSettings, verbose: u8) -> Option<WorkerGuard> {
    let default_filter = match verbose {
        0 => settings.log_filter.clone(),
        1 => "info,visionflow=debug".to_string(),
        _ => "debug,visionflow=trace".to_string(),
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "visionflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Settings come first: they carry the log configuration
    let settings_result = match &cli.settings {
        Some(path) => RuntimeSettings::load_from(path).map(Some),
        None => Ok(None),
    };
    let settings = match &settings_result {
        Ok(Some(settings)) => settings.clone(),
        _ => RuntimeSettings::load_or_default(),
    };
    let _log_guard = init_logging(&settings, cli.verbose);
    if let Err(e) = settings_result {
        tracing::warn!("Failed to load settings, using defaults: {}", e);
    }

    tracing::info!("Starting VisionFlow {}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::load(&cli.pipeline)
        .with_context(|| format!("Loading pipeline {:?}", cli.pipeline))?;
    let registry = StageRegistry::with_builtin_stages();
    let pipeline = PipelineBuilder::with_settings(&settings)
        .build(&config, &registry)
        .with_context(|| format!("Building pipeline '{}'", config.name))?;

    pipeline
        .start()
        .with_context(|| format!("Starting pipeline '{}'", config.name))?;

    let timeout = cli
        .timeout
        .map(Duration::from_secs)
        .or_else(|| settings.run_timeout());
    let report = pipeline.run_to_completion(timeout);

    for error in &report.errors {
        tracing::error!(
            "Stage '{}' (instance {}) failed: {}",
            error.location(),
            error.node_id,
            error.message
        );
    }

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report).context("Serializing run report")?;
        std::fs::write(path, json).with_context(|| format!("Writing run report {:?}", path))?;
        tracing::info!("Run report written to {:?}", path);
    }

    tracing::info!(
        "Pipeline '{}' finished in {} ms with {} error(s)",
        report.pipeline,
        report.elapsed_ms.unwrap_or_default(),
        report.errors.len()
    );

    if report.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
