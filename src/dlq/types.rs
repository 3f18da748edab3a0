//! DLQ types for failure tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::batch::{FailureKind, FailureRecord};

/// Serialized form of a [`FailureRecord`] as written to the DLQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBatch {
    /// Batch identifier (source directory name).
    pub batch: String,
    /// Source directory of the batch. Still present for download and
    /// processing failures; already purged once a batch reached upload.
    pub input_location: PathBuf,
    /// Transformed output kept on disk when it could not be published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Error message describing the failure.
    pub error: String,
    pub kind: FailureKind,
    pub timestamp: DateTime<Utc>,
}

impl From<&FailureRecord> for FailedBatch {
    fn from(record: &FailureRecord) -> Self {
        Self {
            batch: record.subject().id(),
            input_location: record.subject().input_location().to_path_buf(),
            working_dir: record.subject().kept_working_dir().map(PathBuf::from),
            error: record.cause().to_string(),
            kind: record.kind(),
            timestamp: record.timestamp(),
        }
    }
}

/// Failure counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub download: usize,
    pub processing: usize,
    pub upload: usize,
}

impl FailureStats {
    pub fn increment(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::DownloadFailed => self.download += 1,
            FailureKind::ProcessingFailed => self.processing += 1,
            FailureKind::UploadFailed => self.upload += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.download + self.processing + self.upload
    }
}
