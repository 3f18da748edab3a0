//! Dead Letter Queue implementation.
//!
//! Records failed batches to a local directory for later inspection and
//! reprocessing. Each run appends to its own NDJSON file.

use chrono::Utc;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::batch::FailureRecord;
use crate::config::ErrorHandlingConfig;
use crate::error::{DlqCreateDirSnafu, DlqError, DlqSerializeSnafu, DlqWriteSnafu};

use super::types::FailedBatch;

/// Records are flushed once this many are buffered.
const DEFAULT_BUFFER_SIZE: usize = 100;

/// Dead Letter Queue for recording failed batches.
#[derive(Debug)]
pub struct DeadLetterQueue {
    path: PathBuf,
    buffer: Vec<FailedBatch>,
    buffer_size: usize,
    written: usize,
}

impl DeadLetterQueue {
    /// Create a new DLQ from configuration.
    ///
    /// Returns `None` if no DLQ path is configured.
    pub async fn from_config(config: &ErrorHandlingConfig) -> Result<Option<Self>, DlqError> {
        let Some(dir) = &config.dlq_path else {
            return Ok(None);
        };
        Self::open(dir).await.map(Some)
    }

    /// Create the DLQ directory if needed and pick a file name for this run.
    pub async fn open(dir: &Path) -> Result<Self, DlqError> {
        tokio::fs::create_dir_all(dir)
            .await
            .context(DlqCreateDirSnafu { path: dir })?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("failures-{timestamp}.ndjson"));

        info!("DLQ enabled: {}", path.display());

        Ok(Self {
            path,
            buffer: Vec::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            written: 0,
        })
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// File the records are appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written to disk so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Buffer a failure, flushing when the buffer is full.
    pub async fn record(&mut self, record: &FailureRecord) -> Result<(), DlqError> {
        self.buffer.push(FailedBatch::from(record));
        if self.buffer.len() >= self.buffer_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Append buffered records to the DLQ file.
    pub async fn flush(&mut self) -> Result<(), DlqError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut ndjson = String::new();
        for record in &self.buffer {
            let line = serde_json::to_string(record).context(DlqSerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context(DlqWriteSnafu { path: &self.path })?;
        file.write_all(ndjson.as_bytes())
            .await
            .context(DlqWriteSnafu { path: &self.path })?;
        file.flush()
            .await
            .context(DlqWriteSnafu { path: &self.path })?;

        let count = self.buffer.len();
        self.written += count;
        self.buffer.clear();
        debug!("Flushed {} records to DLQ", count);
        Ok(())
    }

    /// Flush any remaining records.
    pub async fn finalize(&mut self) -> Result<(), DlqError> {
        self.flush().await?;
        info!(
            "DLQ finalized: {} records in {}",
            self.written,
            self.path.display()
        );
        Ok(())
    }
}
