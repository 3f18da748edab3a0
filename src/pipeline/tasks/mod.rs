//! Pipeline stage tasks.
//!
//! Each stage runs as its own tokio task and is connected to its neighbours
//! by a [`ClosableQueue`](crate::queue::ClosableQueue) of [`Slot`](crate::batch::Slot)s.

mod download;
mod process;
mod upload;

use std::path::{Path, PathBuf};

pub use download::{DownloadStats, Downloader, list_batches};
pub use process::{ProcessStats, ProcessingHandle, ProcessingStage, StageState};
pub use upload::{UploadStats, Uploader};

/// Recursively copy everything inside `from` into `to`, creating `to`.
///
/// Returns the number of bytes copied.
pub(crate) async fn copy_dir_contents(from: &Path, to: &Path) -> std::io::Result<u64> {
    let mut bytes = 0;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(from.to_path_buf(), to.to_path_buf())];

    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                bytes += tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }

    Ok(bytes)
}
