//! Watermark overlay rendering.
//!
//! The watermark image is scaled relative to the base video width with
//! `scale2ref`, then composited at one of four anchor corners. FFmpeg
//! writes progress to a side-channel file that is tailed while it runs.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cancel::CancelReceiver;
use crate::command::{FfmpegCommand, FfmpegRunner, DEFAULT_POLL_INTERVAL};
use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;
use wmark_models::encoding::{OUTPUT_EXTENSION, OUTPUT_SUFFIX};
use wmark_models::{EncodingConfig, WatermarkPosition, WatermarkSettings, WatermarkSize};

/// Everything one watermark render needs.
#[derive(Debug, Clone)]
pub struct WatermarkJob {
    pub input: PathBuf,
    pub watermark_image: PathBuf,
    pub settings: WatermarkSettings,
    pub progress_file: PathBuf,
    pub output: PathBuf,
}

/// Output path for a given input, placed in `dir`.
///
/// Pure function of the input file name: `clip.mkv` always maps to
/// `clip_watermarked.mp4`, so a rerun overwrites the previous output.
pub fn watermarked_output_path(input: &Path, dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "video".to_string());
    dir.join(format!("{stem}{OUTPUT_SUFFIX}.{OUTPUT_EXTENSION}"))
}

/// Build the filter graph for a position and size.
///
/// Input 0 is the base video and input 1 the watermark image.
pub fn build_overlay_filter(position: WatermarkPosition, size: WatermarkSize) -> String {
    format!(
        "[1:v][0:v]scale2ref=w=main_w*{pct}/100:h=ow/a[wm][base];[base][wm]overlay={pos}",
        pct = size.percent(),
        pos = position.overlay_expr(),
    )
}

/// Renders watermarked videos with FFmpeg.
#[derive(Debug, Clone)]
pub struct WatermarkProcessor {
    ffmpeg: PathBuf,
    encoding: EncodingConfig,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl Default for WatermarkProcessor {
    fn default() -> Self {
        Self::new("ffmpeg", EncodingConfig::default())
    }
}

impl WatermarkProcessor {
    pub fn new(ffmpeg: impl Into<PathBuf>, encoding: EncodingConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            encoding,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_command(&self, job: &WatermarkJob) -> FfmpegCommand {
        let filter = build_overlay_filter(job.settings.position, job.settings.size);

        FfmpegCommand::new(&job.input, &job.output)
            .add_input(&job.watermark_image)
            .filter_complex(filter)
            .video_codec(&self.encoding.codec)
            .preset(&self.encoding.preset)
            .crf(self.encoding.crf)
            .audio_codec("copy")
            .output_args(["-movflags", "+faststart"])
            .progress_file(&job.progress_file)
    }

    /// Apply the watermark and return the output path.
    ///
    /// # Errors
    /// Returns error if:
    /// - an input file is missing
    /// - FFmpeg exits non-zero, is cancelled, or times out
    /// - FFmpeg exits cleanly but leaves no output behind
    pub async fn apply<F>(
        &self,
        job: &WatermarkJob,
        cancel: Option<CancelReceiver>,
        on_progress: F,
    ) -> MediaResult<PathBuf>
    where
        F: Fn(FfmpegProgress) + Send + Sync + 'static,
    {
        for path in [&job.input, &job.watermark_image] {
            if !path.exists() {
                return Err(MediaError::FileNotFound(path.clone()));
            }
        }

        info!(
            input = %job.input.display(),
            watermark = %job.watermark_image.display(),
            position = %job.settings.position,
            size = %job.settings.size,
            "Applying watermark overlay"
        );

        let cmd = self.build_command(job);
        let mut runner = FfmpegRunner::new()
            .with_binary(&self.ffmpeg)
            .with_poll_interval(self.poll_interval)
            .with_timeout(self.timeout);
        if let Some(cancel) = cancel {
            runner = runner.with_cancel(cancel);
        }

        runner.run_with_progress(&cmd, on_progress).await?;

        let produced = tokio::fs::metadata(&job.output)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg produced no output file",
                None,
                Some(0),
            ));
        }

        debug!(output = %job.output.display(), "Watermark applied");
        Ok(job.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_is_deterministic() {
        let dir = Path::new("/work/42");
        let a = watermarked_output_path(Path::new("/work/42/clip.mkv"), dir);
        let b = watermarked_output_path(Path::new("/work/42/clip.mkv"), dir);
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/work/42/clip_watermarked.mp4"));
    }

    #[test]
    fn test_output_path_without_stem() {
        let out = watermarked_output_path(Path::new("/"), Path::new("/work"));
        assert_eq!(out, PathBuf::from("/work/video_watermarked.mp4"));
    }

    #[test]
    fn test_overlay_filter_scale_and_position() {
        let filter = build_overlay_filter(WatermarkPosition::BottomRight, WatermarkSize::Percent20);
        assert!(filter.contains("scale2ref=w=main_w*20/100"));
        assert!(filter.ends_with("overlay=main_w-overlay_w-5:main_h-overlay_h-5"));
    }

    #[test]
    fn test_command_uses_progress_file_and_two_inputs() {
        let job = WatermarkJob {
            input: PathBuf::from("in.mp4"),
            watermark_image: PathBuf::from("thumb.jpg"),
            settings: WatermarkSettings::default(),
            progress_file: PathBuf::from("progress.txt"),
            output: PathBuf::from("in_watermarked.mp4"),
        };
        let args = WatermarkProcessor::default().build_command(&job).build_args();

        assert_eq!(args.iter().filter(|a| a.as_str() == "-i").count(), 2);
        assert!(args.contains(&"progress.txt".to_string()));
        assert!(args.contains(&"ultrafast".to_string()));
        assert!(args.iter().any(|a| a.ends_with("overlay=5:5")));
    }

    #[tokio::test]
    async fn test_missing_input_fails_before_spawning() {
        let job = WatermarkJob {
            input: PathBuf::from("/nonexistent/in.mp4"),
            watermark_image: PathBuf::from("/nonexistent/thumb.jpg"),
            settings: WatermarkSettings::default(),
            progress_file: PathBuf::from("/nonexistent/progress.txt"),
            output: PathBuf::from("/nonexistent/out.mp4"),
        };
        let err = WatermarkProcessor::default()
            .apply(&job, None, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
