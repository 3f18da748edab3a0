//! flurry CLI: stage, transform and publish batch directories.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;

use flurry::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use flurry::{Config, init_tracing, metrics, run_pipeline};

/// Batch directory pipeline driven by an external script.
#[derive(Parser, Debug)]
#[command(name = "flurry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    init_tracing(&args.log_level);

    info!("flurry starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).await.context(MetricsSnafu)?;
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Pipeline: {}", config.name);
        info!("Source: {}", config.source.path.display());
        if let Some(staging) = &config.source.staging_dir {
            info!("Staging: {}", staging.display());
        }
        info!("Max staged: {}", config.source.max_staged);
        info!("Sink: {}", config.sink.path.display());
        info!("Script: {}", config.script.command.join(" "));
        match &config.error_handling.dlq_path {
            Some(dlq) => info!("DLQ: {}", dlq.display()),
            None => info!("DLQ: disabled"),
        }
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_pipeline(config).await?;

    info!("Pipeline completed successfully");
    info!("  Batches staged: {}", stats.download.staged);
    info!("  Batches processed: {}", stats.process.processed);
    info!("  Batches uploaded: {}", stats.upload.uploaded);
    info!(
        "  Failures: {} (download={}, processing={}, upload={})",
        stats.failures.total(),
        stats.failures.download,
        stats.failures.processing,
        stats.failures.upload
    );

    Ok(())
}
