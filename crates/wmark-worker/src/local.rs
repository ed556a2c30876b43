//! Filesystem-backed transport and in-memory preferences.
//!
//! Used by the CLI binary and by tests: "downloads" copy from a local path,
//! "uploads" copy into an outbox directory, and messages are kept in memory
//! and logged.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};
use crate::transport::{LargeFileHost, PreferenceStore, SourceRef, TransferCallback, Transport};
use wmark_models::{MessageId, RequesterId, TransferProgress, UploadMetadata};

const COPY_CHUNK_SIZE: usize = 256 * 1024;

/// A message as last seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Sent {
        chat: RequesterId,
        id: MessageId,
        text: String,
    },
    Edited {
        chat: RequesterId,
        id: MessageId,
        text: String,
    },
}

impl MessageEvent {
    pub fn text(&self) -> &str {
        match self {
            MessageEvent::Sent { text, .. } | MessageEvent::Edited { text, .. } => text,
        }
    }
}

/// Copy `src` to `dest` in chunks, reporting progress after each chunk.
pub async fn copy_with_progress(
    src: &Path,
    dest: &Path,
    progress: &TransferCallback,
) -> TransportResult<u64> {
    let mut reader = tokio::fs::File::open(src).await?;
    let total = reader.metadata().await?.len();
    let mut writer = tokio::fs::File::create(dest).await?;

    let started = Instant::now();
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut done = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        done += n as u64;
        progress(TransferProgress::new(done, total, started.elapsed()));
    }
    writer.flush().await?;
    Ok(done)
}

/// Transport that works against the local filesystem.
#[derive(Debug)]
pub struct LocalTransport {
    outbox: PathBuf,
    next_message_id: AtomicI64,
    events: Mutex<Vec<MessageEvent>>,
}

impl LocalTransport {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
            next_message_id: AtomicI64::new(1),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    /// Every send and edit in order.
    pub fn events(&self) -> Vec<MessageEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Current text of a message.
    pub fn message_text(&self, id: MessageId) -> Option<String> {
        self.events().into_iter().rev().find_map(|event| match event {
            MessageEvent::Sent { id: i, text, .. } | MessageEvent::Edited { id: i, text, .. }
                if i == id =>
            {
                Some(text)
            }
            _ => None,
        })
    }

    fn record(&self, event: MessageEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send_message(&self, chat: RequesterId, text: &str) -> TransportResult<MessageId> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        info!(chat, message_id = id, "{}", text);
        self.record(MessageEvent::Sent {
            chat,
            id,
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: RequesterId,
        message: MessageId,
        text: &str,
    ) -> TransportResult<()> {
        if message <= 0 || message >= self.next_message_id.load(Ordering::SeqCst) {
            return Err(TransportError::messaging(format!(
                "message {message} not found"
            )));
        }
        info!(chat, message_id = message, "{}", text);
        self.record(MessageEvent::Edited {
            chat,
            id: message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn download_to(
        &self,
        source: &SourceRef,
        dest_dir: &Path,
        progress: TransferCallback,
    ) -> TransportResult<Option<PathBuf>> {
        let src = PathBuf::from(&source.file_id);
        if !src.is_file() {
            return Err(TransportError::transfer(format!(
                "source not found: {}",
                src.display()
            )));
        }
        let name = source
            .file_name
            .clone()
            .or_else(|| src.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "download".to_string());

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(name);
        let bytes = copy_with_progress(&src, &dest, &progress).await?;
        debug!(src = %src.display(), dest = %dest.display(), bytes, "Copied download");
        Ok(Some(dest))
    }

    async fn upload_video(
        &self,
        chat: RequesterId,
        video: &Path,
        thumbnail: Option<&Path>,
        metadata: &UploadMetadata,
        progress: TransferCallback,
    ) -> TransportResult<String> {
        let dir = self.outbox.join(chat.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let name = video
            .file_name()
            .ok_or_else(|| TransportError::transfer("video path has no file name"))?;
        let dest = dir.join(name);
        copy_with_progress(video, &dest, &progress).await?;

        if let Some(thumb) = thumbnail {
            let stem = dest
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            tokio::fs::copy(thumb, dir.join(format!("{stem}_thumb.jpg"))).await?;
        }

        let sidecar = serde_json::to_vec_pretty(metadata)
            .map_err(|e| TransportError::transfer(e.to_string()))?;
        tokio::fs::write(dest.with_extension("json"), sidecar).await?;

        Ok(dest.display().to_string())
    }
}

/// Large-file host that drops files into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryHost {
    dir: PathBuf,
}

impl DirectoryHost {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl LargeFileHost for DirectoryHost {
    fn name(&self) -> &str {
        "directory"
    }

    async fn upload(
        &self,
        file: &Path,
        _metadata: &UploadMetadata,
        progress: TransferCallback,
    ) -> TransportResult<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = file
            .file_name()
            .ok_or_else(|| TransportError::transfer("file path has no file name"))?;
        let dest = self.dir.join(name);
        copy_with_progress(file, &dest, &progress).await?;
        Ok(dest.display().to_string())
    }
}

#[derive(Debug, Clone, Default)]
struct StoredPreferences {
    position: Option<String>,
    size: Option<String>,
}

/// Preference store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    entries: RwLock<HashMap<RequesterId, StoredPreferences>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferences {
    async fn position(&self, requester: RequesterId) -> TransportResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&requester).and_then(|p| p.position.clone()))
    }

    async fn size(&self, requester: RequesterId) -> TransportResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&requester).and_then(|p| p.size.clone()))
    }

    async fn set_position(&self, requester: RequesterId, value: &str) -> TransportResult<()> {
        let mut entries = self.entries.write().await;
        entries.entry(requester).or_default().position = Some(value.to_string());
        Ok(())
    }

    async fn set_size(&self, requester: RequesterId, value: &str) -> TransportResult<()> {
        let mut entries = self.entries.write().await;
        entries.entry(requester).or_default().size = Some(value.to_string());
        Ok(())
    }

    async fn reset(&self, requester: RequesterId) -> TransportResult<()> {
        self.entries.write().await.remove(&requester);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_reports_progress() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("clip.mp4");
        tokio::fs::write(&src, vec![7u8; COPY_CHUNK_SIZE * 2 + 10])
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let transport = LocalTransport::new(dir.path().join("outbox"));
        let path = transport
            .download_to(
                &SourceRef::new(src.display().to_string()),
                &dir.path().join("job"),
                Arc::new(move |p| sink.lock().unwrap().push(p)),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path, dir.path().join("job/clip.mp4"));
        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 3);
        assert!(seen.last().unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_download_uses_sender_file_name() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("AgADBQ");
        tokio::fs::write(&src, b"video").await.unwrap();

        let transport = LocalTransport::new(dir.path().join("outbox"));
        let path = transport
            .download_to(
                &SourceRef::new(src.display().to_string()).with_file_name("holiday.mp4"),
                &dir.path().join("job"),
                crate::transport::ignore_progress(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path, dir.path().join("job/holiday.mp4"));
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let transport = LocalTransport::new(dir.path());
        let result = transport
            .download_to(
                &SourceRef::new("/nonexistent/clip.mp4"),
                dir.path(),
                crate::transport::ignore_progress(),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Transfer(_))));
    }

    #[tokio::test]
    async fn test_messages_are_tracked() {
        let transport = LocalTransport::new("/tmp/outbox");
        let id = transport.send_message(1, "Downloading Video...").await.unwrap();
        transport.edit_message(1, id, "Done").await.unwrap();

        assert_eq!(transport.message_text(id).as_deref(), Some("Done"));
        assert_eq!(transport.events().len(), 2);
        assert!(transport.edit_message(1, id + 10, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_preferences_reset() {
        let prefs = InMemoryPreferences::new();
        assert_eq!(prefs.position(1).await.unwrap(), None);

        prefs.set_position(1, "bottom_right").await.unwrap();
        prefs.set_size(1, "20").await.unwrap();
        assert_eq!(prefs.position(1).await.unwrap().as_deref(), Some("bottom_right"));

        prefs.reset(1).await.unwrap();
        assert_eq!(prefs.position(1).await.unwrap(), None);
        assert_eq!(prefs.size(1).await.unwrap(), None);
    }
}
