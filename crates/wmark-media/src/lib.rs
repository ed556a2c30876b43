//! FFmpeg CLI wrapper for watermark rendering.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress` output, piped or via a side-channel file
//! - Cancellation and optional timeouts via tokio
//! - Metadata probing with defaults
//! - Watermark overlay rendering and thumbnail extraction

pub mod cancel;
pub mod command;
pub mod error;
pub mod probe;
pub mod progress;
pub mod thumbnail;
pub mod watermark;

pub use cancel::{cancel_channel, cancelled, is_cancelled, CancelReceiver, CancelSender};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner, ProgressTarget};
pub use error::{MediaError, MediaResult};
pub use probe::{MetadataProbe, VideoInfo};
pub use progress::{FfmpegProgress, ProgressFileTailer};
pub use thumbnail::ThumbnailGenerator;
pub use watermark::{build_overlay_filter, watermarked_output_path, WatermarkJob, WatermarkProcessor};
