//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which records the
//! corresponding Prometheus metric. Without an installed recorder the
//! metric calls are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

use crate::batch::FailureKind;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Pipeline stage that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Process,
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Process => "process",
            Stage::Upload => "upload",
        }
    }
}

/// What a stage did with one slot.
#[derive(Debug, Clone, Copy)]
pub enum BatchOutcome {
    Success,
    Skipped,
    Failed,
}

impl BatchOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::Success => "success",
            BatchOutcome::Skipped => "skipped",
            BatchOutcome::Failed => "failed",
        }
    }
}

/// Event emitted when a stage finishes with one slot.
pub struct BatchProcessed {
    pub stage: Stage,
    pub outcome: BatchOutcome,
    pub pipeline: String,
}

impl InternalEvent for BatchProcessed {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            outcome = self.outcome.as_str(),
            pipeline = %self.pipeline,
            "Batch processed"
        );
        counter!(
            "flurry_batches_total",
            "stage" => self.stage.as_str(),
            "outcome" => self.outcome.as_str(),
            "pipeline" => self.pipeline
        )
        .increment(1);
    }
}

/// Event emitted when the failure reporter receives a record.
pub struct BatchFailed {
    pub kind: FailureKind,
    pub pipeline: String,
}

impl InternalEvent for BatchFailed {
    fn emit(self) {
        trace!(kind = self.kind.as_str(), pipeline = %self.pipeline, "Batch failed");
        counter!(
            "flurry_batch_failures_total",
            "kind" => self.kind.as_str(),
            "pipeline" => self.pipeline
        )
        .increment(1);
    }
}

/// Event emitted when a stage finishes its work on one batch.
pub struct StageDuration {
    pub stage: Stage,
    pub duration: Duration,
    pub pipeline: String,
}

impl InternalEvent for StageDuration {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            duration_ms = self.duration.as_millis(),
            pipeline = %self.pipeline,
            "Stage duration"
        );
        histogram!(
            "flurry_stage_duration_seconds",
            "stage" => self.stage.as_str(),
            "pipeline" => self.pipeline
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a stage observes the depth of its input queue.
pub struct QueueDepth {
    pub stage: Stage,
    pub count: usize,
    pub pipeline: String,
}

impl InternalEvent for QueueDepth {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            count = self.count,
            pipeline = %self.pipeline,
            "Queue depth"
        );
        gauge!(
            "flurry_queue_depth",
            "stage" => self.stage.as_str(),
            "pipeline" => self.pipeline
        )
        .set(self.count as f64);
    }
}

/// Event emitted when a consumed input location is purged.
pub struct InputPurged {
    pub pipeline: String,
}

impl InternalEvent for InputPurged {
    fn emit(self) {
        trace!(pipeline = %self.pipeline, "Input purged");
        counter!("flurry_inputs_purged_total", "pipeline" => self.pipeline).increment(1);
    }
}

/// Event emitted when bytes are copied into a working directory or the sink.
pub struct BytesCopied {
    pub stage: Stage,
    pub bytes: u64,
    pub pipeline: String,
}

impl InternalEvent for BytesCopied {
    fn emit(self) {
        trace!(
            stage = self.stage.as_str(),
            bytes = self.bytes,
            pipeline = %self.pipeline,
            "Bytes copied"
        );
        counter!(
            "flurry_bytes_copied_total",
            "stage" => self.stage.as_str(),
            "pipeline" => self.pipeline
        )
        .increment(self.bytes);
    }
}
