//! flurry: a three-stage batch pipeline driven by an external script.
//!
//! Batch directories are staged from a source root into private working
//! directories, transformed in place by a configured program, and published
//! to a sink root. A batch that fails at any stage becomes a failure record
//! and a skip marker, so downstream stages keep a one-to-one, in-order view
//! of the work.
//!
//! # Example
//!
//! ```ignore
//! use flurry::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("flurry.yaml").unwrap();
//!     let stats = run_pipeline(config).await?;
//!     println!("Uploaded {} batches", stats.upload.uploaded);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod dlq;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod transform;

mod logging;

// Re-export main types
pub use batch::{Batch, ErrorSink, FailureKind, FailureRecord, KeptBatch, Slot};
pub use config::Config;
pub use logging::init_tracing;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use queue::{ClosableQueue, QueueClosed};
pub use transform::{ScriptTransform, Transform};
