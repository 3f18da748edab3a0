//! Dead Letter Queue for failed batch tracking.
//!
//! Failure records published by the pipeline stages are drained by the
//! [`FailureReporter`], which logs them, keeps per-kind statistics and, when
//! a DLQ directory is configured, appends them as NDJSON through the
//! [`DeadLetterQueue`] for later inspection and reprocessing.

mod queue;
mod reporter;
mod types;

pub use queue::DeadLetterQueue;
pub use reporter::FailureReporter;
pub use types::{FailedBatch, FailureStats};
