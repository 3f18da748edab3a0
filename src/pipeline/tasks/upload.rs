//! Background upload task.
//!
//! Publishes each processed batch's working directory to the sink root as
//! `<sink>/<batch id>`. Contents are first copied to a hidden partial
//! directory and renamed into place, so readers of the sink never see a
//! half-written batch.
//!
//! A batch that reaches this stage has already had its source purged, so on
//! failure its working directory is kept on disk and named in the failure
//! record instead of being removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use snafu::prelude::*;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use crate::batch::{Batch, ErrorSink, FailureKind, FailureRecord, Slot};
use crate::config::SinkConfig;
use crate::emit;
use crate::error::{
    ClearPartialSnafu, CopyOutputSnafu, InspectTargetSnafu, PipelineError, PublishError,
    RenameTargetSnafu, TargetExistsSnafu, TaskJoinSnafu,
};
use crate::metrics::events::{
    BatchOutcome, BatchProcessed, BytesCopied, QueueDepth, Stage, StageDuration,
};
use crate::queue::{ClosableQueue, QueueClosed};

use super::copy_dir_contents;

/// Counts of what the uploader did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub uploaded: usize,
    pub failed: usize,
    /// Skips received from upstream.
    pub skipped: usize,
}

/// Handle to the background uploader task.
pub struct Uploader {
    handle: JoinHandle<UploadStats>,
}

impl Uploader {
    /// Spawn the uploader task.
    pub fn spawn(
        sink: SinkConfig,
        input: Arc<ClosableQueue<Slot>>,
        errors: ErrorSink,
        pipeline: String,
    ) -> Self {
        let span = info_span!("upload", pipeline = %pipeline);
        let handle = tokio::spawn(Self::run(sink, input, errors, pipeline).instrument(span));
        Self { handle }
    }

    /// Wait for the uploader to drain its queue.
    pub async fn finish(self) -> Result<UploadStats, PipelineError> {
        self.handle.await.context(TaskJoinSnafu)
    }

    /// Upload every batch until the input queue is closed and drained.
    pub async fn run(
        sink: SinkConfig,
        input: Arc<ClosableQueue<Slot>>,
        errors: ErrorSink,
        pipeline: String,
    ) -> UploadStats {
        let mut stats = UploadStats::default();

        loop {
            emit!(QueueDepth {
                stage: Stage::Upload,
                count: input.len(),
                pipeline: pipeline.clone(),
            });

            let batch = match input.get().await {
                Ok(Slot::Batch(batch)) => batch,
                Ok(Slot::Skip) => {
                    debug!("Nothing to upload for skipped slot");
                    stats.skipped += 1;
                    emit!(BatchProcessed {
                        stage: Stage::Upload,
                        outcome: BatchOutcome::Skipped,
                        pipeline: pipeline.clone(),
                    });
                    continue;
                }
                Err(QueueClosed) => break,
            };

            let start = Instant::now();
            match publish(&batch, &sink.path).await {
                Ok((target, bytes)) => {
                    info!(batch = %batch, bytes, "Uploaded to {}", target.display());
                    emit!(BytesCopied {
                        stage: Stage::Upload,
                        bytes,
                        pipeline: pipeline.clone(),
                    });
                    emit!(StageDuration {
                        stage: Stage::Upload,
                        duration: start.elapsed(),
                        pipeline: pipeline.clone(),
                    });
                    emit!(BatchProcessed {
                        stage: Stage::Upload,
                        outcome: BatchOutcome::Success,
                        pipeline: pipeline.clone(),
                    });
                    stats.uploaded += 1;
                }
                Err(e) => {
                    let record = FailureRecord::for_kept_batch(
                        batch,
                        e.to_string(),
                        FailureKind::UploadFailed,
                    );
                    error!("{}", record.error_message());
                    errors.publish(record);
                    emit!(BatchProcessed {
                        stage: Stage::Upload,
                        outcome: BatchOutcome::Failed,
                        pipeline: pipeline.clone(),
                    });
                    stats.failed += 1;
                }
            }
        }

        info!(
            uploaded = stats.uploaded,
            failed = stats.failed,
            skipped = stats.skipped,
            "Upload stage done"
        );
        stats
    }
}

/// Copy the batch's working directory to `<root>/<id>`.
async fn publish(batch: &Batch, root: &Path) -> Result<(PathBuf, u64), PublishError> {
    let target = root.join(batch.id());
    let exists = tokio::fs::try_exists(&target)
        .await
        .context(InspectTargetSnafu { path: &target })?;
    ensure!(!exists, TargetExistsSnafu { path: &target });

    let partial = root.join(format!(".{}.partial", batch.id()));
    let stale = tokio::fs::try_exists(&partial)
        .await
        .context(InspectTargetSnafu { path: &partial })?;
    if stale {
        tokio::fs::remove_dir_all(&partial)
            .await
            .context(ClearPartialSnafu { path: &partial })?;
    }

    let copied = copy_dir_contents(batch.working_dir(), &partial)
        .await
        .context(CopyOutputSnafu { path: &partial });
    if copied.is_err() {
        // Best effort; the copy error is the one worth reporting.
        let _ = tokio::fs::remove_dir_all(&partial).await;
    }
    let bytes = copied?;

    tokio::fs::rename(&partial, &target)
        .await
        .context(RenameTargetSnafu { path: &target })?;

    Ok((target, bytes))
}
