//! Main processing pipeline.
//!
//! Connects the downloader, processing stage and uploader through two
//! closable queues, with a failure reporter draining the shared error sink.
//!
//! # Architecture
//!
//! ```text
//! source ─▶ Downloader ─▶ [downloaded] ─▶ ProcessingStage ─▶ [processed] ─▶ Uploader ─▶ sink
//!               │                               │                               │
//!               └───────────────────────────────┴──── ErrorSink ────────────────┘
//!                                                         │
//!                                                  FailureReporter ─▶ DLQ
//! ```
//!
//! Shutdown cancels the downloader only. It closes its queue, and every
//! later stage drains what is already queued before closing its own.

mod signal;
pub mod tasks;

use snafu::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batch::{ErrorSink, Slot};
use crate::config::Config;
use crate::dlq::{DeadLetterQueue, FailureReporter, FailureStats};
use crate::error::{DlqSnafu, PipelineError, TaskJoinSnafu};
use crate::queue::ClosableQueue;
use crate::transform::{ScriptTransform, Transform};

use tasks::{
    DownloadStats, Downloader, ProcessStats, ProcessingStage, UploadStats, Uploader,
};

pub use signal::shutdown_signal;

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub download: DownloadStats,
    pub process: ProcessStats,
    pub upload: UploadStats,
    pub failures: FailureStats,
}

/// A configured pipeline, ready to run once.
pub struct Pipeline {
    config: Config,
    transform: Arc<dyn Transform>,
}

impl Pipeline {
    /// Build a pipeline running the configured script.
    pub fn from_config(config: Config) -> Self {
        let transform = Arc::new(ScriptTransform::from_config(&config.script));
        Self::with_transform(config, transform)
    }

    /// Build a pipeline with a caller-supplied transformation.
    pub fn with_transform(config: Config, transform: Arc<dyn Transform>) -> Self {
        Self { config, transform }
    }

    /// Run every stage to completion.
    ///
    /// All stages are awaited even when one fails, so no task outlives the
    /// call. Every stage error is logged; the first, in pipeline order, is
    /// returned.
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineStats, PipelineError> {
        let Self { config, transform } = self;
        let name = config.name.clone();

        let dlq = DeadLetterQueue::from_config(&config.error_handling)
            .await
            .context(DlqSnafu)?;
        let (errors, error_rx) = ErrorSink::channel();
        let reporter = FailureReporter::spawn(error_rx, dlq, name.clone());

        let downloaded: Arc<ClosableQueue<Slot>> = Arc::new(ClosableQueue::new());
        let processed: Arc<ClosableQueue<Slot>> = Arc::new(ClosableQueue::new());

        info!(
            pipeline = %name,
            "Starting pipeline: {} -> {}",
            config.source.path.display(),
            config.sink.path.display()
        );

        // Cancelled by a shutdown signal, or when processing stops for good
        // and nothing would read what is staged.
        let stop_downloads = shutdown.child_token();

        let downloader = Downloader::spawn(
            config.source.clone(),
            downloaded.clone(),
            errors.clone(),
            stop_downloads.clone(),
            name.clone(),
        );
        let processing = ProcessingStage::new(
            downloaded,
            processed.clone(),
            errors.clone(),
            transform,
            name.clone(),
        )
        .spawn();
        let uploader = Uploader::spawn(config.sink.clone(), processed, errors, name.clone());

        let processing = async {
            let result = processing.finish().await;
            if result.is_err() {
                stop_downloads.cancel();
            }
            result
        };
        let (download, process, upload) =
            tokio::join!(downloader.finish(), processing, uploader.finish());

        // Every sink clone went with its stage, so the reporter can drain.
        let failures = reporter.finish().await.context(TaskJoinSnafu)?;

        let failed_stages = log_stage_failures(&[
            ("download", download.as_ref().err()),
            ("process", process.as_ref().err()),
            ("upload", upload.as_ref().err()),
        ]);
        if failed_stages > 1 {
            error!(pipeline = %name, "{} stages failed, returning the first error", failed_stages);
        }

        let stats = PipelineStats {
            download: download?,
            process: process?,
            upload: upload?,
            failures,
        };

        info!(
            pipeline = %name,
            staged = stats.download.staged,
            processed = stats.process.processed,
            uploaded = stats.upload.uploaded,
            failures = stats.failures.total(),
            "Pipeline finished"
        );
        Ok(stats)
    }
}

/// Log every failed stage; returns how many failed.
fn log_stage_failures(results: &[(&str, Option<&PipelineError>)]) -> usize {
    let mut failed = 0;
    for (stage, error) in results {
        if let Some(e) = error {
            error!(stage = *stage, "Pipeline stage failed: {}", e);
            failed += 1;
        }
    }
    failed
}

/// Run the pipeline until the source is exhausted or a shutdown signal arrives.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    let shutdown = CancellationToken::new();

    // Set up signal handler for graceful shutdown
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    Pipeline::from_config(config).run(shutdown).await
}
