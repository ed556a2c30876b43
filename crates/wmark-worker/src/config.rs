//! Worker configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::admission::AdmissionScope;
use wmark_models::encoding::{DEFAULT_CRF, DEFAULT_PRESET};
use wmark_models::{EncodingConfig, RequesterId, DEFAULT_LARGE_FILE_THRESHOLD};

/// Directory under the download root that holds job working files.
pub const FEATURE_DIR_NAME: &str = "WatermarkAdder";
/// File name of a requester's stored watermark image.
pub const WATERMARK_FILE_NAME: &str = "thumb.jpg";
/// File name of the FFmpeg progress side channel inside a job directory.
pub const PROGRESS_FILE_NAME: &str = "progress.txt";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for downloads, watermark images and working directories
    pub download_dir: PathBuf,
    /// x264 preset used for the watermark render
    pub preset: String,
    /// x264 CRF used for the watermark render
    pub crf: u8,
    /// Whether one job runs per process or per requester
    pub admission_scope: AdmissionScope,
    /// Outputs strictly larger than this may go to the large-file host
    pub large_file_threshold: u64,
    /// Enables the large-file host route
    pub allow_large_file_host: bool,
    /// Minimum gap between status message edits
    pub status_interval: Duration,
    /// Interval between progress file polls
    pub progress_poll_interval: Duration,
    /// FFmpeg executable
    pub ffmpeg_path: PathBuf,
    /// FFprobe executable
    pub ffprobe_path: PathBuf,
    /// Kill the transcode after this long; `None` waits indefinitely
    pub transcode_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./DOWNLOADS"),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            admission_scope: AdmissionScope::Global,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            allow_large_file_host: false,
            status_interval: Duration::from_secs(10),
            progress_poll_interval: Duration::from_millis(1000),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            transcode_timeout: None,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            download_dir: std::env::var("WMARK_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            preset: std::env::var("WMARK_PRESET").unwrap_or(defaults.preset),
            crf: env_parsed("WMARK_CRF").unwrap_or(defaults.crf),
            admission_scope: env_parsed("WMARK_ADMISSION_SCOPE")
                .unwrap_or(defaults.admission_scope),
            large_file_threshold: env_parsed("WMARK_LARGE_FILE_THRESHOLD")
                .unwrap_or(defaults.large_file_threshold),
            allow_large_file_host: env_parsed("WMARK_ALLOW_LARGE_FILE_HOST")
                .unwrap_or(defaults.allow_large_file_host),
            status_interval: env_parsed("WMARK_STATUS_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_interval),
            progress_poll_interval: env_parsed("WMARK_PROGRESS_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.progress_poll_interval),
            ffmpeg_path: std::env::var("WMARK_FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("WMARK_FFPROBE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffprobe_path),
            transcode_timeout: env_parsed("WMARK_TRANSCODE_TIMEOUT_SECS").map(Duration::from_secs),
        }
    }

    /// Root the config at a different download directory.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Encoding settings for the watermark render.
    pub fn encoding(&self) -> EncodingConfig {
        EncodingConfig::default()
            .with_preset(&self.preset)
            .with_crf(self.crf)
    }

    /// Feature working directory holding markers and job directories.
    pub fn working_dir(&self) -> PathBuf {
        self.download_dir.join(FEATURE_DIR_NAME)
    }

    /// Working directory of one requester's job.
    pub fn job_dir(&self, requester: RequesterId) -> PathBuf {
        self.working_dir().join(requester.to_string())
    }

    /// Stored watermark image of a requester. Survives job cleanup.
    pub fn watermark_image_path(&self, requester: RequesterId) -> PathBuf {
        self.download_dir
            .join(requester.to_string())
            .join(WATERMARK_FILE_NAME)
    }

    pub fn progress_file(job_dir: &Path) -> PathBuf {
        job_dir.join(PROGRESS_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let config = WorkerConfig::default().with_download_dir("/data");
        assert_eq!(config.working_dir(), PathBuf::from("/data/WatermarkAdder"));
        assert_eq!(config.job_dir(42), PathBuf::from("/data/WatermarkAdder/42"));
        assert_eq!(
            config.watermark_image_path(42),
            PathBuf::from("/data/42/thumb.jpg")
        );
        assert!(!config.watermark_image_path(42).starts_with(config.job_dir(42)));
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.large_file_threshold, 2_097_152_000);
        assert!(!config.allow_large_file_host);
        assert_eq!(config.admission_scope, AdmissionScope::Global);
        assert_eq!(config.encoding().preset, "ultrafast");
        assert!(config.transcode_timeout.is_none());
    }
}
