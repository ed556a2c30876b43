//! Status message rendering and rate-limited relay.
//!
//! Progress callbacks only publish the latest text; a background task edits
//! the requester's status message with it at most once per interval, so slow
//! or failing edits never stall a transfer or the transcode.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::transport::{TransferCallback, Transport};
use wmark_media::FfmpegProgress;
use wmark_models::{MessageId, RequesterId, TransferProgress};

const BAR_WIDTH: usize = 10;

/// Format a byte count with binary units, e.g. `1.50 MiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Format a duration as `1h, 2m, 3s`, dropping zero components.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total % 86_400) / 3600,
        (total % 3600) / 60,
        total % 60,
    );

    let parts: Vec<String> = [(days, "d"), (hours, "h"), (minutes, "m"), (seconds, "s")]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(", ")
    }
}

fn progress_bar(percentage: f64) -> String {
    let filled = ((percentage / 100.0) * BAR_WIDTH as f64).floor() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!("[{}{}]", "●".repeat(filled), "○".repeat(BAR_WIDTH - filled))
}

/// Status text for a download or upload.
pub fn render_transfer(title: &str, progress: &TransferProgress) -> String {
    let percentage = progress.percentage();
    let eta = progress
        .eta()
        .map(format_duration)
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{title}\n\n{bar} {percentage:.2}%\n\n{done} of {total}\nSpeed: {speed}/s\nETA: {eta}",
        bar = progress_bar(percentage),
        done = human_bytes(progress.done_bytes),
        total = human_bytes(progress.total_bytes),
        speed = human_bytes(progress.speed_bytes_per_sec() as u64),
    )
}

/// Status text for the watermark render.
///
/// `total_duration_ms` of `0` means the duration is unknown; the text then
/// reports elapsed output time instead of a percentage.
pub fn render_transcode(progress: &FfmpegProgress, total_duration_ms: i64) -> String {
    let elapsed = Duration::from_millis(progress.out_time_ms.max(0) as u64);
    if total_duration_ms <= 0 {
        return format!(
            "Adding watermark...\n\nProcessed: {}\nSpeed: {:.2}x\n\nSend /cancel to stop.",
            format_duration(elapsed),
            progress.speed
        );
    }

    let percentage = progress.percentage(total_duration_ms);
    let eta = progress
        .eta_seconds(total_duration_ms)
        .map(|s| format_duration(Duration::from_secs_f64(s)))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Adding watermark...\n\n{bar} {percentage:.2}%\n\nSpeed: {speed:.2}x\nETA: {eta}\n\nSend /cancel to stop.",
        bar = progress_bar(percentage),
        speed = progress.speed,
    )
}

/// Wrap a transfer callback so it fires at most once per `interval`.
///
/// The completing update is always forwarded.
pub fn throttle_transfer(inner: TransferCallback, interval: Duration) -> TransferCallback {
    let last: Mutex<Option<Instant>> = Mutex::new(None);
    Arc::new(move |progress: TransferProgress| {
        let now = Instant::now();
        let due = match last.lock() {
            Ok(mut last) => {
                let due = progress.is_complete()
                    || last.map(|t| now.duration_since(t) >= interval).unwrap_or(true);
                if due {
                    *last = Some(now);
                }
                due
            }
            Err(_) => true,
        };
        if due {
            inner(progress);
        }
    })
}

/// Cheap handle for publishing the latest status text.
#[derive(Clone)]
pub struct StatusPublisher {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl StatusPublisher {
    pub fn publish(&self, text: impl Into<String>) {
        self.tx.send_replace(Some(text.into()));
    }
}

/// Background task that mirrors published text into one status message.
pub struct StatusRelay {
    publisher: StatusPublisher,
    handle: Option<JoinHandle<()>>,
}

impl StatusRelay {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        chat: RequesterId,
        message: MessageId,
        min_interval: Duration,
    ) -> Self {
        let (tx, mut rx) = watch::channel(None::<String>);
        let handle = tokio::spawn(async move {
            let mut last_sent: Option<String> = None;
            while rx.changed().await.is_ok() {
                let text = rx.borrow_and_update().clone();
                let Some(text) = text else { continue };
                if last_sent.as_deref() == Some(text.as_str()) {
                    continue;
                }
                match transport.edit_message(chat, message, &text).await {
                    Ok(()) => last_sent = Some(text),
                    Err(e) => debug!(chat, message, error = %e, "Status edit skipped"),
                }
                tokio::time::sleep(min_interval).await;
            }
        });

        Self {
            publisher: StatusPublisher { tx: Arc::new(tx) },
            handle: Some(handle),
        }
    }

    pub fn publisher(&self) -> StatusPublisher {
        self.publisher.clone()
    }

    pub fn publish(&self, text: impl Into<String>) {
        self.publisher.publish(text);
    }

    /// Stop relaying. No edit is issued after this returns.
    pub async fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for StatusRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
