//! Batch types flowing between pipeline stages.
//!
//! A [`Batch`] is handed from stage to stage through the queues wrapped in a
//! [`Slot`]. When a stage cannot produce a batch it publishes a
//! [`FailureRecord`] to the [`ErrorSink`] and forwards [`Slot::Skip`] so the
//! downstream stages stay in step with the batch stream.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::warn;

/// One unit of pipeline work.
///
/// The working directory is scratch space owned by the batch and is removed
/// when the batch is dropped. The input location is the source directory the
/// batch was staged from.
#[derive(Debug)]
pub struct Batch {
    id: String,
    input_location: PathBuf,
    working_dir: TempDir,
}

impl Batch {
    pub fn new(id: impl Into<String>, input_location: impl Into<PathBuf>, working_dir: TempDir) -> Self {
        Self {
            id: id.into(),
            input_location: input_location.into(),
            working_dir,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source directory to purge once the batch has been transformed.
    pub fn input_location(&self) -> &Path {
        &self.input_location
    }

    pub fn working_dir(&self) -> &Path {
        self.working_dir.path()
    }

    /// Give up ownership of the working directory so it outlives the batch.
    pub fn keep_working_dir(self) -> KeptBatch {
        KeptBatch {
            id: self.id,
            input_location: self.input_location,
            working_dir: self.working_dir.keep(),
        }
    }
}

/// A batch whose working directory is left on disk, e.g. for recovery of
/// output that could not be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeptBatch {
    pub id: String,
    pub input_location: PathBuf,
    pub working_dir: PathBuf,
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// An item on a stage queue.
#[derive(Debug)]
pub enum Slot {
    /// A batch ready for the next stage.
    Batch(Batch),
    /// An earlier stage failed here; downstream advances without a batch.
    Skip,
}

impl Slot {
    pub fn is_skip(&self) -> bool {
        matches!(self, Slot::Skip)
    }

    pub fn batch(&self) -> Option<&Batch> {
        match self {
            Slot::Batch(batch) => Some(batch),
            Slot::Skip => None,
        }
    }

    pub fn into_batch(self) -> Option<Batch> {
        match self {
            Slot::Batch(batch) => Some(batch),
            Slot::Skip => None,
        }
    }
}

/// Classification of a batch-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DownloadFailed,
    ProcessingFailed,
    UploadFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DownloadFailed => "download_failed",
            FailureKind::ProcessingFailed => "processing_failed",
            FailureKind::UploadFailed => "upload_failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failure record refers to.
#[derive(Debug)]
pub enum FailureSubject {
    /// The batch that failed. Its working directory lives as long as the record.
    Batch(Batch),
    /// The batch that failed, with its working directory kept on disk.
    Kept(KeptBatch),
    /// No batch was produced; the path gives context.
    Location(PathBuf),
}

impl FailureSubject {
    pub fn id(&self) -> String {
        match self {
            FailureSubject::Batch(batch) => batch.id().to_string(),
            FailureSubject::Kept(kept) => kept.id.clone(),
            FailureSubject::Location(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    pub fn input_location(&self) -> &Path {
        match self {
            FailureSubject::Batch(batch) => batch.input_location(),
            FailureSubject::Kept(kept) => &kept.input_location,
            FailureSubject::Location(path) => path,
        }
    }

    /// Working directory that survives the record, if any.
    pub fn kept_working_dir(&self) -> Option<&Path> {
        match self {
            FailureSubject::Kept(kept) => Some(&kept.working_dir),
            FailureSubject::Batch(_) | FailureSubject::Location(_) => None,
        }
    }
}

/// Immutable record of one batch-level failure.
#[derive(Debug)]
pub struct FailureRecord {
    subject: FailureSubject,
    cause: String,
    kind: FailureKind,
    timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(subject: FailureSubject, cause: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            subject,
            cause: cause.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn for_batch(batch: Batch, cause: impl Into<String>, kind: FailureKind) -> Self {
        Self::new(FailureSubject::Batch(batch), cause, kind)
    }

    /// Record a failure for a batch whose working directory must not be lost.
    pub fn for_kept_batch(batch: Batch, cause: impl Into<String>, kind: FailureKind) -> Self {
        Self::new(FailureSubject::Kept(batch.keep_working_dir()), cause, kind)
    }

    pub fn for_location(path: impl Into<PathBuf>, cause: impl Into<String>, kind: FailureKind) -> Self {
        Self::new(FailureSubject::Location(path.into()), cause, kind)
    }

    pub fn subject(&self) -> &FailureSubject {
        &self.subject
    }

    pub fn batch(&self) -> Option<&Batch> {
        match &self.subject {
            FailureSubject::Batch(batch) => Some(batch),
            FailureSubject::Kept(_) | FailureSubject::Location(_) => None,
        }
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Human-readable one-line description for logs.
    pub fn error_message(&self) -> String {
        let mut message = format!(
            "Batch {} ({}) failed with {}: {}",
            self.subject.id(),
            self.subject.input_location().display(),
            self.kind,
            self.cause
        );
        if let Some(dir) = self.subject.kept_working_dir() {
            message.push_str(&format!(" (output kept in {})", dir.display()));
        }
        message
    }
}

/// Unbounded sink of failure records, read by the failure reporter.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<FailureRecord>,
}

impl ErrorSink {
    /// Create a sink and the receiver its records are delivered to.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FailureRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publish a record. Never waits; a record published after the reader
    /// has gone is logged and dropped.
    pub fn publish(&self, record: FailureRecord) {
        if let Err(mpsc::error::SendError(record)) = self.tx.send(record) {
            warn!(
                kind = %record.kind(),
                "Failure reporter is gone, dropping record: {}",
                record.error_message()
            );
        }
    }
}
