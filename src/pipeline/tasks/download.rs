//! Background download task.
//!
//! Stages every batch directory under the source root into its own working
//! directory and feeds the processing stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use snafu::prelude::*;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::batch::{Batch, ErrorSink, FailureKind, FailureRecord, Slot};
use crate::config::SourceConfig;
use crate::emit;
use crate::error::{
    CopyInputSnafu, CreateWorkingDirSnafu, ListSourceSnafu, NoBatchNameSnafu, PipelineError,
    StageError, TaskJoinSnafu,
};
use crate::metrics::events::{BatchOutcome, BatchProcessed, BytesCopied, Stage, StageDuration};
use crate::queue::{CloseGuard, ClosableQueue};

use super::copy_dir_contents;

/// Counts of what the downloader did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Batches staged and queued.
    pub staged: usize,
    /// Batches that could not be staged.
    pub failed: usize,
}

/// Handle to the background downloader task.
pub struct Downloader {
    handle: JoinHandle<Result<DownloadStats, PipelineError>>,
}

impl Downloader {
    /// Spawn the downloader task.
    pub fn spawn(
        source: SourceConfig,
        output: Arc<ClosableQueue<Slot>>,
        errors: ErrorSink,
        shutdown: CancellationToken,
        pipeline: String,
    ) -> Self {
        let span = info_span!("download", pipeline = %pipeline);
        let handle = tokio::spawn(
            Self::run(source, output, errors, shutdown, pipeline).instrument(span),
        );
        Self { handle }
    }

    /// Wait for the downloader to finish.
    pub async fn finish(self) -> Result<DownloadStats, PipelineError> {
        self.handle.await.context(TaskJoinSnafu)?
    }

    /// Stage each batch in name order, then close the output queue.
    ///
    /// At most `source.max_staged` batches wait in the output queue at a
    /// time. Stops early, still closing the queue, when `shutdown` is
    /// cancelled.
    pub async fn run(
        source: SourceConfig,
        output: Arc<ClosableQueue<Slot>>,
        errors: ErrorSink,
        shutdown: CancellationToken,
        pipeline: String,
    ) -> Result<DownloadStats, PipelineError> {
        let _close_output = CloseGuard::new(output.clone());
        let mut stats = DownloadStats::default();

        let inputs = list_batches(&source.path)
            .await
            .context(ListSourceSnafu { path: &source.path })?;
        info!(batches = inputs.len(), "Found batches to download");

        for input in inputs {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping downloads");
                    break;
                }
                _ = output.wait_for_room(source.max_staged) => {}
            }

            let start = Instant::now();
            match stage_batch(&input, source.staging_dir.as_deref()).await {
                Ok((batch, bytes)) => {
                    debug!(batch = %batch, bytes, "Staged batch in {}", batch.working_dir().display());
                    emit!(BytesCopied {
                        stage: Stage::Download,
                        bytes,
                        pipeline: pipeline.clone(),
                    });
                    emit!(StageDuration {
                        stage: Stage::Download,
                        duration: start.elapsed(),
                        pipeline: pipeline.clone(),
                    });
                    emit!(BatchProcessed {
                        stage: Stage::Download,
                        outcome: BatchOutcome::Success,
                        pipeline: pipeline.clone(),
                    });
                    stats.staged += 1;
                    output.put(Slot::Batch(batch));
                }
                Err(e) => {
                    let record = FailureRecord::for_location(
                        input,
                        e.to_string(),
                        FailureKind::DownloadFailed,
                    );
                    error!("{}", record.error_message());
                    errors.publish(record);
                    emit!(BatchProcessed {
                        stage: Stage::Download,
                        outcome: BatchOutcome::Failed,
                        pipeline: pipeline.clone(),
                    });
                    stats.failed += 1;
                    output.put(Slot::Skip);
                }
            }
        }

        info!(
            staged = stats.staged,
            failed = stats.failed,
            "Download stage done"
        );
        Ok(stats)
    }
}

/// Immediate sub-directories of `root`, sorted by name.
///
/// Hidden directories are ignored so producers can write a batch under a
/// dot-prefixed name and rename it into place when complete.
pub async fn list_batches(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut batches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            batches.push(entry.path());
        }
    }
    batches.sort();
    Ok(batches)
}

/// Copy one input directory into a fresh working directory.
///
/// Returns the batch and the number of bytes copied.
async fn stage_batch(
    input: &Path,
    staging_dir: Option<&Path>,
) -> Result<(Batch, u64), StageError> {
    let id = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context(NoBatchNameSnafu { path: input })?;

    let prefix = format!("flurry-{id}-");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    let working_dir = match staging_dir {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .context(CreateWorkingDirSnafu)?;

    let bytes = copy_dir_contents(input, working_dir.path())
        .await
        .context(CopyInputSnafu { path: input })?;

    Ok((Batch::new(id, input, working_dir), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(root: &Path) -> SourceConfig {
        SourceConfig {
            path: root.to_path_buf(),
            staging_dir: None,
            max_staged: 8,
        }
    }

    fn write_batch(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("a.txt"), name).unwrap();
        std::fs::write(dir.join("nested").join("b.txt"), "bb").unwrap();
    }

    async fn drain(queue: &ClosableQueue<Slot>) -> Vec<Slot> {
        let mut slots = Vec::new();
        while let Ok(slot) = queue.get().await {
            slots.push(slot);
        }
        slots
    }

    #[tokio::test]
    async fn test_list_batches_sorted_dirs_only() {
        let root = TempDir::new().unwrap();
        write_batch(root.path(), "b2");
        write_batch(root.path(), "b1");
        std::fs::create_dir(root.path().join(".incomplete")).unwrap();
        std::fs::write(root.path().join("stray.txt"), "x").unwrap();

        let batches = list_batches(root.path()).await.unwrap();
        let names: Vec<_> = batches
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn test_downloader_stages_batches_in_order() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        write_batch(root.path(), "b1");
        write_batch(root.path(), "b2");

        let output = Arc::new(ClosableQueue::new());
        let (errors, mut error_rx) = ErrorSink::channel();
        let config = SourceConfig {
            path: root.path().to_path_buf(),
            staging_dir: Some(staging.path().to_path_buf()),
            max_staged: 8,
        };

        let stats = Downloader::run(
            config,
            output.clone(),
            errors,
            CancellationToken::new(),
            "test".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(stats.staged, 2);
        let slots = drain(&output).await;
        let batches: Vec<_> = slots.iter().map(|s| s.batch().unwrap()).collect();
        assert_eq!(batches[0].id(), "b1");
        assert_eq!(batches[1].id(), "b2");
        assert!(batches[0].working_dir().starts_with(staging.path()));
        assert!(batches[0].working_dir().join("nested").join("b.txt").exists());
        assert_eq!(batches[1].input_location(), root.path().join("b2"));
        // Staging copies, it does not consume the input.
        assert!(root.path().join("b1").join("a.txt").exists());
        assert!(error_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal_but_closes_queue() {
        let root = TempDir::new().unwrap();
        let output = Arc::new(ClosableQueue::new());
        let (errors, _rx) = ErrorSink::channel();

        let err = Downloader::run(
            source(&root.path().join("missing")),
            output.clone(),
            errors,
            CancellationToken::new(),
            "test".to_string(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::ListSource { .. }));
        assert!(output.is_closed());
    }

    #[tokio::test]
    async fn test_staging_failure_becomes_skip() {
        let root = TempDir::new().unwrap();
        write_batch(root.path(), "b1");
        let output = Arc::new(ClosableQueue::new());
        let (errors, mut error_rx) = ErrorSink::channel();
        let config = SourceConfig {
            path: root.path().to_path_buf(),
            staging_dir: Some(root.path().join("no-such-staging-dir")),
            max_staged: 8,
        };

        let stats = Downloader::run(
            config,
            output.clone(),
            errors,
            CancellationToken::new(),
            "test".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(stats.failed, 1);
        let slots = drain(&output).await;
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_skip());
        let record = error_rx.recv().await.unwrap();
        assert_eq!(record.kind(), FailureKind::DownloadFailed);
        assert_eq!(record.subject().id(), "b1");
        assert!(record.cause().starts_with("Failed to create working directory"));
    }

    #[tokio::test]
    async fn test_staging_waits_for_room_and_stops_on_cancel() {
        let root = TempDir::new().unwrap();
        for name in ["b1", "b2", "b3"] {
            write_batch(root.path(), name);
        }
        let output = Arc::new(ClosableQueue::new());
        let (errors, _rx) = ErrorSink::channel();
        let shutdown = CancellationToken::new();
        let mut config = source(root.path());
        config.max_staged = 1;

        let downloader = Downloader::spawn(
            config,
            output.clone(),
            errors,
            shutdown.clone(),
            "test".to_string(),
        );

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(output.len(), 1);
        assert!(!output.is_closed());

        // Taking one batch lets exactly one more be staged.
        assert_eq!(output.get().await.unwrap().batch().unwrap().id(), "b1");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(output.len(), 1);

        shutdown.cancel();
        let stats = tokio::time::timeout(std::time::Duration::from_secs(1), downloader.finish())
            .await
            .expect("cancel should release a waiting downloader")
            .unwrap();
        assert_eq!(stats.staged, 2);
        assert!(output.is_closed());
    }

    #[tokio::test]
    async fn test_cancelled_downloader_closes_without_batches() {
        let root = TempDir::new().unwrap();
        write_batch(root.path(), "b1");
        let output = Arc::new(ClosableQueue::new());
        let (errors, _rx) = ErrorSink::channel();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = Downloader::run(
            source(root.path()),
            output.clone(),
            errors,
            shutdown,
            "test".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(stats, DownloadStats::default());
        assert!(drain(&output).await.is_empty());
    }
}
