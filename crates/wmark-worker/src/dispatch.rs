//! Result dispatch: send the watermarked output back.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{JobError, JobResult, TransportError};
use crate::transport::{DispatchReceipt, LargeFileHost, TransferCallback, Transport};
use wmark_media::{cancelled, CancelReceiver};
use wmark_models::{RequesterId, UploadMetadata, UploadTarget};

/// Routes outputs to the transport or the large-file host by size.
pub struct ResultDispatcher {
    transport: Arc<dyn Transport>,
    large_host: Option<Arc<dyn LargeFileHost>>,
    threshold: u64,
    large_host_enabled: bool,
}

impl ResultDispatcher {
    pub fn new(transport: Arc<dyn Transport>, threshold: u64, large_host_enabled: bool) -> Self {
        Self {
            transport,
            large_host: None,
            threshold,
            large_host_enabled,
        }
    }

    pub fn with_large_host(mut self, host: Arc<dyn LargeFileHost>) -> Self {
        self.large_host = Some(host);
        self
    }

    pub fn select_target(&self, file_size: u64) -> UploadTarget {
        UploadTarget::select(file_size, self.threshold, self.large_host_enabled)
    }

    /// Upload `output` (and its thumbnail, when there is one).
    pub async fn dispatch(
        &self,
        chat: RequesterId,
        output: &Path,
        thumbnail: Option<&Path>,
        metadata: &UploadMetadata,
        on_progress: TransferCallback,
        cancel: Option<CancelReceiver>,
    ) -> JobResult<DispatchReceipt> {
        let bytes = tokio::fs::metadata(output)
            .await
            .map_err(|e| JobError::upload(format!("output unreadable: {e}")))?
            .len();
        let target = self.select_target(bytes);

        info!(
            chat,
            target = target.as_str(),
            bytes,
            has_thumbnail = thumbnail.is_some(),
            "Dispatching output"
        );

        let upload = async {
            match target {
                UploadTarget::Direct => {
                    self.transport
                        .upload_video(chat, output, thumbnail, metadata, on_progress)
                        .await
                }
                UploadTarget::LargeFileHost => match &self.large_host {
                    Some(host) => {
                        info!(chat, host = host.name(), "Routing output to large-file host");
                        host.upload(output, metadata, on_progress).await
                    }
                    None => Err(TransportError::transfer(
                        "large-file host is enabled but not configured",
                    )),
                },
            }
        };

        let location = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(JobError::Cancelled),
            result = upload => result.map_err(|e| JobError::upload(e.to_string()))?,
        };

        Ok(DispatchReceipt {
            target,
            location,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportResult;
    use crate::transport::{ignore_progress, SourceRef};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wmark_models::{MessageId, DEFAULT_LARGE_FILE_THRESHOLD};

    /// Records uploads without reading the file.
    #[derive(Default)]
    struct RecordingTransport {
        uploads: Mutex<Vec<(PathBuf, bool)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_message(&self, _: RequesterId, _: &str) -> TransportResult<MessageId> {
            Ok(1)
        }

        async fn edit_message(&self, _: RequesterId, _: MessageId, _: &str) -> TransportResult<()> {
            Ok(())
        }

        async fn download_to(
            &self,
            _: &SourceRef,
            _: &Path,
            _: TransferCallback,
        ) -> TransportResult<Option<PathBuf>> {
            Ok(None)
        }

        async fn upload_video(
            &self,
            _: RequesterId,
            video: &Path,
            thumbnail: Option<&Path>,
            _: &UploadMetadata,
            _: TransferCallback,
        ) -> TransportResult<String> {
            self.uploads
                .lock()
                .unwrap()
                .push((video.to_path_buf(), thumbnail.is_some()));
            Ok("msg:1".into())
        }
    }

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            duration_secs: 10,
            width: 1280,
            height: 720,
            file_size: 0,
        }
    }

    #[tokio::test]
    async fn test_oversized_output_goes_direct_without_flag() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("clip_watermarked.mp4");
        // Sparse 2.3 GB file.
        std::fs::File::create(&output)
            .unwrap()
            .set_len(2_300_000_000)
            .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = ResultDispatcher::new(transport.clone(), DEFAULT_LARGE_FILE_THRESHOLD, false);
        let receipt = dispatcher
            .dispatch(7, &output, None, &metadata(), ignore_progress(), None)
            .await
            .unwrap();

        assert_eq!(receipt.target, UploadTarget::Direct);
        assert_eq!(receipt.bytes, 2_300_000_000);
        assert_eq!(transport.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enabled_host_without_implementation_fails() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("big.mp4");
        tokio::fs::write(&output, vec![0u8; 64]).await.unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = ResultDispatcher::new(transport.clone(), 10, true);
        let err = dispatcher
            .dispatch(7, &output, None, &metadata(), ignore_progress(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Upload(_)));
        assert!(transport.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_host_receives_big_outputs() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("big.mp4");
        tokio::fs::write(&output, vec![1u8; 64]).await.unwrap();

        let host_dir = dir.path().join("host");
        let dispatcher = ResultDispatcher::new(Arc::new(RecordingTransport::default()), 10, true)
            .with_large_host(Arc::new(crate::local::DirectoryHost::new(&host_dir)));
        let receipt = dispatcher
            .dispatch(7, &output, None, &metadata(), ignore_progress(), None)
            .await
            .unwrap();

        assert_eq!(receipt.target, UploadTarget::LargeFileHost);
        assert!(host_dir.join("big.mp4").exists());
    }

    #[test]
    fn test_threshold_is_strict() {
        let dispatcher = ResultDispatcher::new(Arc::new(RecordingTransport::default()), 100, true);
        assert_eq!(dispatcher.select_target(100), UploadTarget::Direct);
        assert_eq!(dispatcher.select_target(101), UploadTarget::LargeFileHost);
    }
}
