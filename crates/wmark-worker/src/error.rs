//! Worker error types.

use thiserror::Error;
use wmark_media::MediaError;

pub type JobResult<T> = Result<T, JobError>;
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures reported by the messaging transport or preference store.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Messaging failed: {0}")]
    Messaging(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Preference store error: {0}")]
    Preferences(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn messaging(msg: impl Into<String>) -> Self {
        Self::Messaging(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }
}

/// Error classification surfaced to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    BusyRejection,
    NoWatermark,
    DownloadFailure,
    TranscodeFailure,
    ThumbnailFailure,
    UploadFailure,
    Cancelled,
    Unexpected,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::BusyRejection => "busy",
            JobErrorKind::NoWatermark => "no_watermark",
            JobErrorKind::DownloadFailure => "download_failure",
            JobErrorKind::TranscodeFailure => "transcode_failure",
            JobErrorKind::ThumbnailFailure => "thumbnail_failure",
            JobErrorKind::UploadFailure => "upload_failure",
            JobErrorKind::Cancelled => "cancelled",
            JobErrorKind::Unexpected => "unexpected",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Another job is already running")]
    Busy,

    #[error("No watermark image has been set")]
    NoWatermark,

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Thumbnail failed: {0}")]
    Thumbnail(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map a render failure, keeping cancellation distinct.
    pub fn from_transcode(err: MediaError) -> Self {
        if err.is_cancelled() {
            return Self::Cancelled;
        }
        match err {
            MediaError::FfmpegFailed {
                message,
                exit_code,
                ..
            } => match exit_code {
                Some(code) => Self::Transcode(format!("{message} (exit code {code})")),
                None => Self::Transcode(message),
            },
            MediaError::Timeout(secs) => Self::Transcode(format!("timed out after {secs}s")),
            other => Self::Transcode(other.to_string()),
        }
    }

    /// Map a thumbnail failure. Only cancellation ends the job.
    pub fn from_thumbnail(err: MediaError) -> Self {
        if err.is_cancelled() {
            return Self::Cancelled;
        }
        Self::Thumbnail(err.to_string())
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::Busy => JobErrorKind::BusyRejection,
            JobError::NoWatermark => JobErrorKind::NoWatermark,
            JobError::Download(_) => JobErrorKind::DownloadFailure,
            JobError::Transcode(_) => JobErrorKind::TranscodeFailure,
            JobError::Thumbnail(_) => JobErrorKind::ThumbnailFailure,
            JobError::Upload(_) => JobErrorKind::UploadFailure,
            JobError::Cancelled => JobErrorKind::Cancelled,
            JobError::Transport(_) | JobError::Io(_) | JobError::Internal(_) => {
                JobErrorKind::Unexpected
            }
        }
    }

    /// Thumbnail failures degrade the upload instead of ending the job.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, JobError::Thumbnail(_))
    }

    /// Text shown to the requester for this failure.
    pub fn user_message(&self) -> String {
        match self {
            JobError::Busy => {
                "Sorry, I'm busy with another task right now!\n\nTry again after some time.".into()
            }
            JobError::NoWatermark => {
                "You haven't set a watermark yet!\n\nSend me a JPG or PNG image to use as your watermark.".into()
            }
            JobError::Download(msg) => format!("Unable to download the video!\n\nError: {msg}"),
            JobError::Transcode(msg) => {
                format!("Failed to add the watermark. Please try again.\n\nError: {msg}")
            }
            JobError::Thumbnail(msg) => format!("Could not generate a thumbnail: {msg}"),
            JobError::Upload(msg) => format!("Unable to upload the video!\n\nError: {msg}"),
            JobError::Cancelled => "Process cancelled.".into(),
            other => format!("Something went wrong!\n\nError: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(JobError::Busy.kind(), JobErrorKind::BusyRejection);
        assert_eq!(
            JobError::download("gone").kind(),
            JobErrorKind::DownloadFailure
        );
        assert_eq!(
            JobError::internal("boom").kind(),
            JobErrorKind::Unexpected
        );
        assert!(!JobError::Thumbnail("x".into()).is_fatal());
        assert!(JobError::upload("x").is_fatal());
    }

    #[test]
    fn test_transcode_mapping() {
        let err = JobError::from_transcode(MediaError::Cancelled);
        assert!(matches!(err, JobError::Cancelled));

        let err = JobError::from_transcode(MediaError::ffmpeg_failed("FFmpeg failed", None, Some(1)));
        assert_eq!(err.kind(), JobErrorKind::TranscodeFailure);
        assert!(err.user_message().contains("exit code 1"));
    }

    #[test]
    fn test_thumbnail_mapping() {
        let err = JobError::from_thumbnail(MediaError::thumbnail_failed("no frame"));
        assert_eq!(err.kind(), JobErrorKind::ThumbnailFailure);
        assert!(!err.is_fatal());

        let err = JobError::from_thumbnail(MediaError::Cancelled);
        assert!(matches!(err, JobError::Cancelled));
        assert!(err.is_fatal());
    }
}
