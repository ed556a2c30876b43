//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cancel::{cancelled, CancelReceiver};
use crate::error::{MediaError, MediaResult};
use wmark_models::{MediaAsset, DEFAULT_HEIGHT, DEFAULT_WIDTH};

/// Video file information as reported by FFprobe.
///
/// Fields the container does not carry stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Width in pixels
    pub width: Option<u32>,
    /// Height in pixels
    pub height: Option<u32>,
    /// Video codec
    pub codec: Option<String>,
    /// File size in bytes
    pub size: Option<u64>,
}

impl VideoInfo {
    /// Fill gaps with pipeline defaults.
    pub fn into_asset(self, path: impl Into<PathBuf>) -> MediaAsset {
        let duration_secs = self
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.floor() as u64)
            .unwrap_or(0);

        MediaAsset {
            path: path.into(),
            duration_secs,
            width: self.width.filter(|w| *w > 0).unwrap_or(DEFAULT_WIDTH),
            height: self.height.filter(|h| *h > 0).unwrap_or(DEFAULT_HEIGHT),
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Parse FFprobe's `-print_format json` output.
pub fn parse_ffprobe_json(bytes: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(bytes)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let format_duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());
    let stream_duration = video_stream
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    Ok(VideoInfo {
        duration: format_duration.or(stream_duration),
        width: video_stream.and_then(|s| s.width),
        height: video_stream.and_then(|s| s.height),
        codec: video_stream.and_then(|s| s.codec_name.clone()),
        size: probe
            .format
            .as_ref()
            .and_then(|f| f.size.as_deref())
            .and_then(|s| s.parse::<u64>().ok()),
    })
}

/// Metadata extraction backed by FFprobe.
#[derive(Debug, Clone)]
pub struct MetadataProbe {
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl Default for MetadataProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl MetadataProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    /// Kill FFprobe after this long.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe a video file for information.
    ///
    /// The FFprobe process is killed when `cancel` fires or the timeout
    /// elapses.
    pub async fn probe_video(
        &self,
        path: impl AsRef<Path>,
        cancel: Option<CancelReceiver>,
    ) -> MediaResult<VideoInfo> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let binary = which::which(&self.binary)
            .map_err(|_| MediaError::FfprobeNotFound(self.binary.display().to_string()))?;

        let child = Command::new(binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping the output future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                info!(path = %path.display(), "FFprobe cancelled, killing process");
                return Err(MediaError::Cancelled);
            }
            _ = deadline => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!(path = %path.display(), "FFprobe timed out after {} seconds", secs);
                return Err(MediaError::Timeout(secs));
            }
            output = child.wait_with_output() => output?,
        };

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: "FFprobe failed".to_string(),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        parse_ffprobe_json(&output.stdout)
    }

    /// Probe a file, degrading to defaults instead of failing.
    ///
    /// Missing duration becomes `0`, missing dimensions become 1280x720.
    /// A cancelled probe also degrades; callers check the signal afterwards.
    pub async fn probe(&self, path: impl AsRef<Path>, cancel: Option<CancelReceiver>) -> MediaAsset {
        let path = path.as_ref();
        match self.probe_video(path, cancel).await {
            Ok(info) => {
                debug!(path = %path.display(), ?info, "Probed media");
                info.into_asset(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Probe degraded, using defaults");
                MediaAsset::with_defaults(path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "duration": "9.9"}
        ],
        "format": {"duration": "10.520000", "size": "1048576"}
    }"#;

    #[test]
    fn test_parse_ffprobe_json() {
        let info = parse_ffprobe_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.size, Some(1048576));

        let asset = info.into_asset("/tmp/a.mp4");
        assert_eq!(asset.duration_secs, 10);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let info = parse_ffprobe_json(br#"{"streams": [{"codec_type": "video"}]}"#).unwrap();
        let asset = info.into_asset("/tmp/a.mp4");
        assert_eq!(asset.duration_secs, 0);
        assert_eq!(asset.width, DEFAULT_WIDTH);
        assert_eq!(asset.height, DEFAULT_HEIGHT);
    }

    #[test]
    fn test_stream_duration_used_when_format_lacks_it() {
        let info = parse_ffprobe_json(
            br#"{"streams": [{"codec_type": "video", "duration": "4.2"}], "format": {}}"#,
        )
        .unwrap();
        assert_eq!(info.into_asset("x.mp4").duration_secs, 4);
    }

    #[tokio::test]
    async fn test_probe_never_fails() {
        let probe = MetadataProbe::new("/nonexistent/ffprobe");
        let asset = probe.probe("/nonexistent/video.mp4", None).await;
        assert_eq!(asset, MediaAsset::with_defaults("/nonexistent/video.mp4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_hanging_ffprobe() {
        use crate::cancel::cancel_channel;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("ffprobe-hang");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let video = dir.path().join("in.mp4");
        std::fs::write(&video, b"video").unwrap();

        let (tx, rx) = cancel_channel();
        let probe = MetadataProbe::new(&script);
        let started = Instant::now();
        let task = tokio::spawn(async move { probe.probe_video(&video, Some(rx)).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_degrades_to_defaults() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("ffprobe-hang");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let video = dir.path().join("in.mp4");
        std::fs::write(&video, b"video").unwrap();

        let probe = MetadataProbe::new(&script).with_timeout(Some(Duration::from_millis(100)));
        let err = probe.probe_video(&video, None).await.unwrap_err();
        assert!(matches!(err, MediaError::Timeout(_)));
        assert_eq!(probe.probe(&video, None).await, MediaAsset::with_defaults(&video));
    }
}
