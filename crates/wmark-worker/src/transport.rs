//! Collaborator seams: the messaging transport, the preference store, and
//! the optional large-file host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::TransportResult;
use wmark_models::{MessageId, RequesterId, TransferProgress, UploadMetadata, UploadTarget};

/// Progress sink for byte transfers.
pub type TransferCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// A no-op progress sink.
pub fn ignore_progress() -> TransferCallback {
    Arc::new(|_| {})
}

/// Reference to a media file held by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Transport-specific handle
    pub file_id: String,
    /// Original file name, if the sender supplied one
    pub file_name: Option<String>,
}

impl SourceRef {
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// Where a finished output ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub target: UploadTarget,
    /// Message id, URL, or path reported by the receiving side
    pub location: String,
    pub bytes: u64,
}

/// Messaging transport used to talk to requesters and move media.
///
/// Transfers are cancelled by dropping the returned future.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(&self, chat: RequesterId, text: &str) -> TransportResult<MessageId>;

    async fn edit_message(
        &self,
        chat: RequesterId,
        message: MessageId,
        text: &str,
    ) -> TransportResult<()>;

    /// Download `source` into `dest_dir`.
    ///
    /// `Ok(None)` means the transport finished without producing a file.
    async fn download_to(
        &self,
        source: &SourceRef,
        dest_dir: &Path,
        progress: TransferCallback,
    ) -> TransportResult<Option<PathBuf>>;

    /// Send a video back to the requester, returning where it landed.
    async fn upload_video(
        &self,
        chat: RequesterId,
        video: &Path,
        thumbnail: Option<&Path>,
        metadata: &UploadMetadata,
        progress: TransferCallback,
    ) -> TransportResult<String>;
}

/// Alternative destination for outputs above the size threshold.
#[async_trait]
pub trait LargeFileHost: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn upload(
        &self,
        file: &Path,
        metadata: &UploadMetadata,
        progress: TransferCallback,
    ) -> TransportResult<String>;
}

/// Per-requester watermark preferences.
///
/// Values are stored as raw strings; unknown or absent values resolve to
/// defaults on read.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn position(&self, requester: RequesterId) -> TransportResult<Option<String>>;

    async fn size(&self, requester: RequesterId) -> TransportResult<Option<String>>;

    async fn set_position(&self, requester: RequesterId, value: &str) -> TransportResult<()>;

    async fn set_size(&self, requester: RequesterId, value: &str) -> TransportResult<()>;

    async fn reset(&self, requester: RequesterId) -> TransportResult<()>;
}
