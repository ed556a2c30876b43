//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cancel::{cancelled, CancelReceiver};
use crate::error::{MediaError, MediaResult};
use crate::progress::{is_progress_line, parse_progress_line, watch_progress_file, FfmpegProgress};

/// Number of non-progress stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Default interval between progress file polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where FFmpeg writes its `-progress` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressTarget {
    /// Interleaved with stderr
    Pipe,
    /// A side-channel file polled while the process runs
    File(PathBuf),
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file paths, in `-i` order
    inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before the first -i)
    input_args: Vec<String>,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
    /// Progress destination
    progress: ProgressTarget,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![input.as_ref().to_path_buf()],
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
            progress: ProgressTarget::Pipe,
        }
    }

    /// Add another input file.
    pub fn add_input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(input.as_ref().to_path_buf());
        self
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Write `-progress` output to a side-channel file.
    pub fn progress_file(mut self, path: impl AsRef<Path>) -> Self {
        self.progress = ProgressTarget::File(path.as_ref().to_path_buf());
        self
    }

    pub fn progress_target(&self) -> &ProgressTarget {
        &self.progress
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.push("-progress".to_string());
        args.push(match &self.progress {
            ProgressTarget::Pipe => "pipe:2".to_string(),
            ProgressTarget::File(path) => path.to_string_lossy().to_string(),
        });

        args.extend(self.input_args.clone());

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// FFmpeg executable name or path
    binary: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<CancelReceiver>,
    /// Kill the process after this long
    timeout: Option<Duration>,
    /// Interval between progress file polls
    poll_interval: Duration,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner using `ffmpeg` from `PATH`.
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            cancel_rx: None,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use a specific FFmpeg executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: CancelReceiver) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the progress file poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    ///
    /// With [`ProgressTarget::File`] a poller task tails the file while the
    /// process runs and is joined before this returns.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + Sync + 'static,
    {
        let binary = which::which(&self.binary)
            .map_err(|_| MediaError::FfmpegNotFound(self.binary.display().to_string()))?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", binary.display(), args.join(" "));

        if let ProgressTarget::File(path) = cmd.progress_target() {
            // Stale blocks from an earlier run would be read as fresh progress.
            let _ = tokio::fs::remove_file(path).await;
        }

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        let callback = Arc::new(progress_callback);
        let parse_stderr = matches!(cmd.progress_target(), ProgressTarget::Pipe);

        let stderr_callback = Arc::clone(&callback);
        let stderr_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut current = FfmpegProgress::default();

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if parse_stderr {
                        if let Some(progress) = parse_progress_line(&line, &mut current) {
                            stderr_callback(progress);
                        }
                    }
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }

            Vec::from(tail).join("\n")
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let file_watcher = match cmd.progress_target() {
            ProgressTarget::File(path) => {
                let file_callback = Arc::clone(&callback);
                Some(tokio::spawn(watch_progress_file(
                    path.clone(),
                    self.poll_interval,
                    stop_rx,
                    move |progress| file_callback(progress),
                )))
            }
            ProgressTarget::Pipe => None,
        };

        let result = self.wait_for_completion(&mut child).await;

        // The poller is part of this call; stop and join it before returning.
        let _ = stop_tx.send(true);
        if let Some(handle) = file_watcher {
            let _ = handle.await;
        }
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        result.map_err(|e| e.with_stderr(stderr_tail))
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(MediaError::ffmpeg_failed(
                        "FFmpeg exited with non-zero status",
                        None,
                        status.code(),
                    ))
                }
            }
            _ = cancelled(self.cancel_rx.clone()) => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            _ = deadline => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout(secs))
            }
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg(binary: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let binary = binary.as_ref();
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .video_codec("libx264")
            .crf(18);

        let args = cmd.build_args();
        assert!(args.contains(&"-ss".to_string()));
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_multiple_inputs_keep_order() {
        let args = FfmpegCommand::new("video.mp4", "out.mp4")
            .add_input("logo.png")
            .build_args();

        let inputs: Vec<&String> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| flag.as_str() == "-i")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(inputs, vec!["video.mp4", "logo.png"]);
    }

    #[test]
    fn test_progress_target() {
        let piped = FfmpegCommand::new("a.mp4", "b.mp4").build_args();
        let pos = piped.iter().position(|a| a == "-progress").unwrap();
        assert_eq!(piped[pos + 1], "pipe:2");

        let filed = FfmpegCommand::new("a.mp4", "b.mp4")
            .progress_file("/work/progress.txt")
            .build_args();
        let pos = filed.iter().position(|a| a == "-progress").unwrap();
        assert_eq!(filed[pos + 1], "/work/progress.txt");
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let runner = FfmpegRunner::new().with_binary("/nonexistent/ffmpeg-binary");
        let cmd = FfmpegCommand::new("a.mp4", "b.mp4");
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }
}
