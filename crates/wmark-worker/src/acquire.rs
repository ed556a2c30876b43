//! Source video acquisition.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::{JobError, JobResult};
use crate::transport::{SourceRef, TransferCallback, Transport};
use wmark_media::{cancelled, CancelReceiver};

/// Downloads the submitted video into the job directory.
pub struct AssetAcquirer {
    transport: Arc<dyn Transport>,
}

impl AssetAcquirer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Download `source` into `dest_dir`.
    ///
    /// A transport error, a missing result, or an empty file is a download
    /// failure.
    pub async fn acquire(
        &self,
        source: &SourceRef,
        dest_dir: &Path,
        on_progress: TransferCallback,
        cancel: Option<CancelReceiver>,
    ) -> JobResult<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let downloaded = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(JobError::Cancelled),
            result = self.transport.download_to(source, dest_dir, on_progress) => result,
        };

        let path = downloaded
            .map_err(|e| JobError::download(e.to_string()))?
            .ok_or_else(|| JobError::download("transport returned no file"))?;

        let size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(JobError::download("downloaded file is missing or empty"));
        }

        info!(path = %path.display(), bytes = size, "Source acquired");
        Ok(path)
    }
}
