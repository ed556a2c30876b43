//! FFmpeg progress parsing.
//!
//! FFmpeg's `-progress` output is a stream of `key=value` lines grouped into
//! blocks, each block terminated by `progress=continue` or `progress=end`.
//! The same parser serves both the piped stderr mode and the side-channel
//! file mode, where [`ProgressFileTailer`] reads only what was appended since
//! the previous poll.

use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Keys FFmpeg emits in `-progress` blocks.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).clamp(0.0, 100.0)
    }

    /// Estimate time remaining in seconds.
    ///
    /// `None` unless the reported speed is finite and positive.
    pub fn eta_seconds(&self, total_duration_ms: i64) -> Option<f64> {
        if !self.speed.is_finite()
            || self.speed <= 0.0
            || self.out_time_ms <= 0
            || total_duration_ms <= 0
        {
            return None;
        }

        let remaining_ms = total_duration_ms - self.out_time_ms;
        if remaining_ms <= 0 {
            return Some(0.0);
        }

        // Time remaining = remaining duration / speed
        Some((remaining_ms as f64 / 1000.0) / self.speed)
    }
}

/// Whether a line belongs to a `-progress` block.
pub(crate) fn is_progress_line(line: &str) -> bool {
    line.trim()
        .split_once('=')
        .map(|(key, _)| PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"))
        .unwrap_or(false)
}

/// Parse a progress line, updating `current`.
///
/// Returns a snapshot when the line closes a block.
pub(crate) fn parse_progress_line(line: &str, current: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        match key {
            // Both keys carry microseconds despite the name of the second.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    current.out_time_ms = us / 1000;
                }
            }
            "out_time" => {
                current.out_time = value.to_string();
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    current.fps = fps;
                }
            }
            "speed" => {
                // Format: "1.5x" or "N/A"
                if let Some(speed) = value
                    .trim()
                    .strip_suffix('x')
                    .and_then(|s| s.parse().ok())
                {
                    current.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    current.is_complete = true;
                }
                return Some(current.clone());
            }
            _ => {}
        }
    }

    None
}

/// Incremental reader for a `-progress` side-channel file.
#[derive(Debug)]
pub struct ProgressFileTailer {
    path: PathBuf,
    offset: u64,
    carry: String,
    current: FfmpegProgress,
}

impl ProgressFileTailer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            carry: String::new(),
            current: FfmpegProgress::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read newly appended lines and return the latest completed block.
    ///
    /// A missing file (FFmpeg has not opened it yet) yields `None`.
    pub async fn poll(&mut self) -> Option<FfmpegProgress> {
        let mut file = tokio::fs::File::open(&self.path).await.ok()?;
        let len = file.metadata().await.ok()?.len();
        if len < self.offset {
            // Truncated by a rerun; start over.
            self.offset = 0;
            self.carry.clear();
        }
        if len == self.offset {
            return None;
        }

        file.seek(SeekFrom::Start(self.offset)).await.ok()?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        let read = file.read_to_end(&mut buf).await.ok()?;
        self.offset += read as u64;

        self.carry.push_str(&String::from_utf8_lossy(&buf));
        let mut latest = None;
        while let Some(newline) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=newline).collect();
            if let Some(snapshot) = parse_progress_line(&line, &mut self.current) {
                latest = Some(snapshot);
            }
        }
        latest
    }
}

/// Poll a progress file until `stop` flips or its sender is dropped.
///
/// Every poll that completes a block forwards the newest snapshot to
/// `on_progress`. A final poll runs after the stop signal so the closing
/// `progress=end` block is not lost.
pub async fn watch_progress_file<F>(
    path: PathBuf,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    on_progress: F,
) where
    F: Fn(FfmpegProgress) + Send + Sync,
{
    let mut tailer = ProgressFileTailer::new(path);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let stopping = tokio::select! {
            _ = ticker.tick() => false,
            _ = stop.changed() => true,
        };

        if let Some(snapshot) = tailer.poll().await {
            trace!(frame = snapshot.frame, out_time_ms = snapshot.out_time_ms, "FFmpeg progress");
            on_progress(snapshot);
        }

        if stopping || *stop.borrow() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[test]
    fn test_progress_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
    }

    #[test]
    fn test_eta_calculation() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            speed: 2.0, // 2x realtime
            ..Default::default()
        };

        // 5 seconds remaining at 2x speed = 2.5 seconds ETA
        let eta = progress.eta_seconds(10000).unwrap();
        assert!((eta - 2.5).abs() < 0.01);
        assert!(progress.eta_seconds(0).is_none());
    }

    #[test]
    fn test_eta_ignores_non_finite_speed() {
        let mut progress = FfmpegProgress::default();
        parse_progress_line("out_time_ms=5000000", &mut progress);
        parse_progress_line("speed=nanx", &mut progress);
        assert!(progress.speed.is_nan());
        assert!(progress.eta_seconds(10000).is_none());

        progress.speed = f64::INFINITY;
        assert!(progress.eta_seconds(10000).is_none());
    }

    #[test]
    fn test_progress_parsing() {
        let mut progress = FfmpegProgress::default();

        parse_progress_line("out_time_us=5000000", &mut progress);
        assert_eq!(progress.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        parse_progress_line("speed=N/A", &mut progress);
        assert!((progress.speed - 1.5).abs() < 0.01);

        let result = parse_progress_line("progress=end", &mut progress);
        assert!(result.is_some());
        assert!(progress.is_complete);
    }

    #[test]
    fn test_is_progress_line() {
        assert!(is_progress_line("frame=12"));
        assert!(is_progress_line("stream_0_0_q=28.0"));
        assert!(!is_progress_line("[libx264 @ 0x55] using cpu capabilities"));
        assert!(!is_progress_line("Error opening input"));
    }

    #[tokio::test]
    async fn test_tailer_reads_appended_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.txt");
        let mut tailer = ProgressFileTailer::new(&path);

        assert!(tailer.poll().await.is_none(), "missing file yields nothing");

        tokio::fs::write(&path, "frame=10\nout_time_us=1000000\nprogress=continue\nframe=2")
            .await
            .unwrap();
        let first = tailer.poll().await.unwrap();
        assert_eq!(first.frame, 10);
        assert_eq!(first.out_time_ms, 1000);
        assert!(!first.is_complete);

        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("0\nout_time_us=2000000\nprogress=end\n");
        tokio::fs::write(&path, contents).await.unwrap();

        let second = tailer.poll().await.unwrap();
        assert_eq!(second.frame, 20, "partial line is joined across polls");
        assert!(second.is_complete);
        assert!(tailer.poll().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_stops_and_flushes_final_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.txt");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let sink = Arc::clone(&seen);
        let handle = tokio::spawn(watch_progress_file(
            path.clone(),
            Duration::from_secs(3600),
            stop_rx,
            move |p| sink.lock().unwrap().push(p),
        ));

        tokio::fs::write(&path, "frame=5\nprogress=end\n").await.unwrap();
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.last().map(|p| p.is_complete).unwrap_or(false));
    }
}
