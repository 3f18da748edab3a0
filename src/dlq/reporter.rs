//! Failure reporting loop.
//!
//! Drains the error sink until every stage has dropped its sender. Records
//! are only recorded here; retrying failed batches is left to whoever reads
//! the DLQ.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::batch::FailureRecord;
use crate::emit;
use crate::metrics::events::BatchFailed;

use super::DeadLetterQueue;
use super::types::FailureStats;

/// Handle to the background failure reporter task.
pub struct FailureReporter {
    handle: JoinHandle<FailureStats>,
}

impl FailureReporter {
    /// Spawn the reporter task.
    pub fn spawn(
        rx: mpsc::UnboundedReceiver<FailureRecord>,
        dlq: Option<DeadLetterQueue>,
        pipeline: String,
    ) -> Self {
        let handle = tokio::spawn(Self::run(rx, dlq, pipeline));
        Self { handle }
    }

    /// Wait for the reporter to drain; returns the failure counts.
    ///
    /// Only completes once every `ErrorSink` clone has been dropped.
    pub async fn finish(self) -> Result<FailureStats, tokio::task::JoinError> {
        self.handle.await
    }

    /// Consume records until the channel closes.
    pub async fn run(
        mut rx: mpsc::UnboundedReceiver<FailureRecord>,
        mut dlq: Option<DeadLetterQueue>,
        pipeline: String,
    ) -> FailureStats {
        let mut stats = FailureStats::default();

        while let Some(record) = rx.recv().await {
            stats.increment(record.kind());
            emit!(BatchFailed {
                kind: record.kind(),
                pipeline: pipeline.clone(),
            });
            warn!(
                pipeline = %pipeline,
                batch = %record.subject().id(),
                kind = %record.kind(),
                "Recorded failure: {}",
                record.cause()
            );

            if let Some(dlq) = dlq.as_mut()
                && let Err(e) = dlq.record(&record).await
            {
                error!(pipeline = %pipeline, "Failed to write to DLQ: {}", e);
            }
        }

        if let Some(dlq) = dlq.as_mut()
            && let Err(e) = dlq.finalize().await
        {
            error!(pipeline = %pipeline, "Failed to finalize DLQ: {}", e);
        }

        info!(
            pipeline = %pipeline,
            "Failure reporter finished: {} failures (download={}, processing={}, upload={})",
            stats.total(),
            stats.download,
            stats.processing,
            stats.upload
        );
        stats
    }
}
