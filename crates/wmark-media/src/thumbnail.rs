//! Thumbnail generation.

use image::imageops::FilterType;
use image::ImageFormat;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::cancel::CancelReceiver;
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Pick a frame timestamp in `[0, duration_secs)`.
///
/// Returns `None` for an empty range instead of sampling it.
pub fn pick_timestamp<R: Rng>(duration_secs: u64, rng: &mut R) -> Option<u64> {
    if duration_secs == 0 {
        return None;
    }
    Some(rng.random_range(0..duration_secs))
}

/// Extracts a still frame and re-encodes it at the video's dimensions.
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    ffmpeg: PathBuf,
    timeout: Option<Duration>,
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl ThumbnailGenerator {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout: None,
        }
    }

    /// Kill the frame extraction after this long.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Generate a JPEG thumbnail from a random frame of `video_path`.
    ///
    /// Fails with [`MediaError::ThumbnailFailed`] when the duration is
    /// unknown (`0`) or the dimensions are zero, and with
    /// [`MediaError::Cancelled`] when `cancel` fires mid-extraction.
    pub async fn generate(
        &self,
        video_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        duration_secs: u64,
        width: u32,
        height: u32,
        cancel: Option<CancelReceiver>,
    ) -> MediaResult<PathBuf> {
        let video_path = video_path.as_ref();
        let output_path = output_path.as_ref().to_path_buf();

        if width == 0 || height == 0 {
            return Err(MediaError::thumbnail_failed(format!(
                "invalid thumbnail size {width}x{height}"
            )));
        }
        let timestamp = {
            let mut rng = rand::rng();
            pick_timestamp(duration_secs, &mut rng)
        }
        .ok_or_else(|| MediaError::thumbnail_failed("video duration is unknown or zero"))?;

        debug!(
            video = %video_path.display(),
            timestamp,
            "Extracting thumbnail frame"
        );

        let cmd = FfmpegCommand::new(video_path, &output_path)
            .seek(timestamp as f64)
            .single_frame();
        let mut runner = FfmpegRunner::new()
            .with_binary(&self.ffmpeg)
            .with_timeout(self.timeout);
        if let Some(cancel) = cancel {
            runner = runner.with_cancel(cancel);
        }
        runner.run(&cmd).await?;

        if !output_path.exists() {
            return Err(MediaError::thumbnail_failed("no frame was extracted"));
        }

        let target = output_path.clone();
        tokio::task::spawn_blocking(move || resize_to_jpeg(&target, width, height))
            .await
            .map_err(|e| MediaError::internal(format!("thumbnail task failed: {e}")))??;

        Ok(output_path)
    }
}

/// Decode, resize, and re-encode an image in place as JPEG.
fn resize_to_jpeg(path: &Path, width: u32, height: u32) -> MediaResult<()> {
    let img = image::open(path)?;
    img.resize_exact(width, height, FilterType::Triangle)
        .to_rgb8()
        .save_with_format(path, ImageFormat::Jpeg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    #[test]
    fn test_pick_timestamp_guards_empty_range() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick_timestamp(0, &mut rng), None);
    }

    #[test]
    fn test_pick_timestamp_within_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let ts = pick_timestamp(10, &mut rng).unwrap();
            assert!(ts < 10);
        }
        assert_eq!(pick_timestamp(1, &mut rng), Some(0));
    }

    #[tokio::test]
    async fn test_zero_duration_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let err = ThumbnailGenerator::new("/nonexistent/ffmpeg")
            .generate(
                dir.path().join("v.mp4"),
                dir.path().join("t.jpg"),
                0,
                1280,
                720,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ThumbnailFailed(_)));
        assert!(!dir.path().join("t.jpg").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_stops_frame_extraction() {
        use crate::cancel::cancel_channel;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("ffmpeg-hang");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (tx, rx) = cancel_channel();
        let generator = ThumbnailGenerator::new(&script);
        let video = dir.path().join("v.mp4");
        let thumb = dir.path().join("t.jpg");
        let started = Instant::now();
        let task = tokio::spawn(async move {
            generator.generate(video, thumb, 10, 64, 36, Some(rx)).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_resize_to_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.jpg");
        image::RgbImage::from_pixel(64, 32, image::Rgb([200, 10, 10]))
            .save_with_format(&path, ImageFormat::Jpeg)
            .unwrap();

        resize_to_jpeg(&path, 16, 9).unwrap();

        let resized = image::open(&path).unwrap();
        assert_eq!((resized.width(), resized.height()), (16, 9));
    }
}
