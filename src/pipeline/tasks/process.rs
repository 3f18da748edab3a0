//! Processing stage: runs the transform on each downloaded batch.
//!
//! Exactly one slot is forwarded for every slot taken off the input queue,
//! in dequeue order. A failed transform becomes a failure record plus
//! [`Slot::Skip`]; the batch's input is left in place for inspection.

use std::sync::Arc;
use std::time::Instant;

use snafu::ResultExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use crate::batch::{Batch, ErrorSink, FailureKind, FailureRecord, Slot};
use crate::emit;
use crate::error::{PipelineError, PurgeSnafu, TaskJoinSnafu};
use crate::metrics::events::{
    BatchOutcome, BatchProcessed, InputPurged, QueueDepth, Stage, StageDuration,
};
use crate::queue::{CloseGuard, ClosableQueue, QueueClosed};
use crate::transform::Transform;

/// Lifecycle of a processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Running,
    /// The input queue reported closed. Terminal.
    Done,
}

/// Counts of what the processing stage did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Batches transformed and forwarded.
    pub processed: usize,
    /// Batches whose transform failed.
    pub failed: usize,
    /// Skips received from upstream and forwarded.
    pub skipped: usize,
}

/// Consumer of the downloaded queue and sole producer of the upload queue.
pub struct ProcessingStage {
    input: Arc<ClosableQueue<Slot>>,
    output: Arc<ClosableQueue<Slot>>,
    errors: ErrorSink,
    transform: Arc<dyn Transform>,
    pipeline: String,
    state: StageState,
    stats: ProcessStats,
}

impl ProcessingStage {
    pub fn new(
        input: Arc<ClosableQueue<Slot>>,
        output: Arc<ClosableQueue<Slot>>,
        errors: ErrorSink,
        transform: Arc<dyn Transform>,
        pipeline: impl Into<String>,
    ) -> Self {
        Self {
            input,
            output,
            errors,
            transform,
            pipeline: pipeline.into(),
            state: StageState::Running,
            stats: ProcessStats::default(),
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Spawn the stage as its own task.
    pub fn spawn(self) -> ProcessingHandle {
        let span = info_span!("process", pipeline = %self.pipeline);
        ProcessingHandle {
            handle: tokio::spawn(self.run().instrument(span)),
        }
    }

    /// Drain the input queue until it is closed, then close the output queue.
    ///
    /// A transform failure never ends the loop. A failure to purge consumed
    /// input does; the output queue is still closed before the error is
    /// returned.
    pub async fn run(mut self) -> Result<ProcessStats, PipelineError> {
        let _close_output = CloseGuard::new(self.output.clone());

        self.process_all().await?;

        info!(
            state = ?self.state(),
            processed = self.stats.processed,
            failed = self.stats.failed,
            skipped = self.stats.skipped,
            "Processing stage done"
        );
        Ok(self.stats)
    }

    async fn process_all(&mut self) -> Result<(), PipelineError> {
        while !(self.input.is_empty() && self.state == StageState::Done) {
            emit!(QueueDepth {
                stage: Stage::Process,
                count: self.input.len(),
                pipeline: self.pipeline.clone(),
            });
            debug!("Waiting for next batch to process");

            let batch = match self.input.get().await {
                Ok(Slot::Batch(batch)) => batch,
                Ok(Slot::Skip) => {
                    info!("Skipping slot left empty by an earlier failure");
                    self.stats.skipped += 1;
                    self.emit_outcome(BatchOutcome::Skipped);
                    self.output.put(Slot::Skip);
                    continue;
                }
                Err(QueueClosed) => {
                    debug!("Input queue closed");
                    self.state = StageState::Done;
                    break;
                }
            };

            let slot = self.process_batch(batch).await?;
            self.output.put(slot);
        }
        Ok(())
    }

    async fn process_batch(&mut self, batch: Batch) -> Result<Slot, PipelineError> {
        let working_dir = batch.working_dir().to_path_buf();
        info!(batch = %batch, "Running transform on {}", working_dir.display());

        let start = Instant::now();
        let result = self.transform.run(&working_dir).await;
        emit!(StageDuration {
            stage: Stage::Process,
            duration: start.elapsed(),
            pipeline: self.pipeline.clone(),
        });

        if let Err(e) = result {
            let record =
                FailureRecord::for_batch(batch, e.to_string(), FailureKind::ProcessingFailed);
            error!("{}", record.error_message());
            self.errors.publish(record);
            self.stats.failed += 1;
            self.emit_outcome(BatchOutcome::Failed);
            return Ok(Slot::Skip);
        }

        info!(
            batch = %batch,
            "Finished transform, removing input {}",
            batch.input_location().display()
        );
        tokio::fs::remove_dir_all(batch.input_location())
            .await
            .context(PurgeSnafu {
                path: batch.input_location(),
            })?;
        emit!(InputPurged {
            pipeline: self.pipeline.clone(),
        });

        self.stats.processed += 1;
        self.emit_outcome(BatchOutcome::Success);
        Ok(Slot::Batch(batch))
    }

    fn emit_outcome(&self, outcome: BatchOutcome) {
        emit!(BatchProcessed {
            stage: Stage::Process,
            outcome,
            pipeline: self.pipeline.clone(),
        });
    }
}

/// Handle to a spawned processing stage.
pub struct ProcessingHandle {
    handle: JoinHandle<Result<ProcessStats, PipelineError>>,
}

impl ProcessingHandle {
    /// Wait for the stage to finish.
    pub async fn finish(self) -> Result<ProcessStats, PipelineError> {
        self.handle.await.context(TaskJoinSnafu)?
    }
}
