mod config;

use clap::{Parser, Subcommand};
use collector::metrics_defs::ALL_METRICS;
use config::{Config, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_metrics;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const METRICS_PREFIX: &str = "feedback";

#[derive(Parser)]
#[command(version, about = "Collects and lists staff feedback")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "feedback.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the feedback API
    Serve,
    /// Connect to the configured document store once and exit
    CheckStore,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("the config file has no `collector` section")]
    MissingCollectorConfig,

    #[error("invalid sentry DSN: {0}")]
    InvalidSentryDsn(String),

    #[error("could not install the metrics exporter: {0}")]
    Metrics(String),

    #[error("could not start the runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Collector(#[from] collector::CollectorError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured by this file, so it is not installed yet
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let _sentry = match init_logging(config.sentry_dsn()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Feedback service failed");
            ExitCode::FAILURE
        }
    }
}

fn run(command: CliCommand, config: Config) -> Result<(), CliError> {
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let collector_config = config.collector.ok_or(CliError::MissingCollectorConfig)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match command {
        CliCommand::Serve => {
            tracing::info!("Starting feedback collector");
            rt.block_on(collector::run(collector_config))?;
        }
        CliCommand::CheckStore => {
            rt.block_on(collector::check_store(collector_config))?;
        }
    }

    Ok(())
}

fn init_logging(sentry_dsn: Option<&str>) -> Result<Option<sentry::ClientInitGuard>, CliError> {
    let guard = match sentry_dsn {
        Some(dsn) => {
            let dsn = dsn
                .parse::<sentry::types::Dsn>()
                .map_err(|e| CliError::InvalidSentryDsn(e.to_string()))?;

            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    Ok(guard)
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;
    describe_metrics(ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
