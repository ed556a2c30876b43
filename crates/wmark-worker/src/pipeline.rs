//! Per-job pipeline state machine.
//!
//! ```text
//! Acquiring -> Probing -> Watermarking -> ProbingOutput -> ThumbnailGen -> Dispatching -> Done
//!      \__________\____________\_______________\_______________\______________\______-> Failed
//! ```
//!
//! Each stage yields a typed result; the driver matches it to pick the next
//! transition. Thumbnail failures degrade the upload and do not leave the
//! happy path. Every terminal stage ends in exactly one status edit followed
//! by cleanup.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use crate::acquire::AssetAcquirer;
use crate::admission::AdmissionGate;
use crate::cleanup::{CleanupCoordinator, CleanupReport};
use crate::config::WorkerConfig;
use crate::dispatch::ResultDispatcher;
use crate::error::{JobError, JobResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::status::{
    human_bytes, render_transcode, render_transfer, throttle_transfer, StatusRelay,
};
use crate::transport::{DispatchReceipt, LargeFileHost, SourceRef, TransferCallback, Transport};
use wmark_media::{
    is_cancelled, watermarked_output_path, CancelReceiver, MetadataProbe, ThumbnailGenerator,
    WatermarkJob, WatermarkProcessor,
};
use wmark_models::{JobId, JobStage, MessageId, RequesterId, UploadMetadata, WatermarkSettings};

/// Prefix of the one success summary a completed job produces.
pub const SUCCESS_PREFIX: &str = "Watermark added successfully!";

/// An admitted job, ready to run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub requester_id: RequesterId,
    pub status_message_id: MessageId,
    pub source: SourceRef,
    pub settings: WatermarkSettings,
}

#[derive(Debug)]
pub enum JobOutcome {
    Done {
        receipt: DispatchReceipt,
        thumbnail_attached: bool,
    },
    Failed {
        stage: JobStage,
        error: JobError,
    },
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }

    pub fn error(&self) -> Option<&JobError> {
        match self {
            JobOutcome::Failed { error, .. } => Some(error),
            JobOutcome::Done { .. } => None,
        }
    }
}

/// Everything observable about a finished job.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: JobId,
    /// Stages entered, in order, ending in `Done` or `Failed`
    pub stages: Vec<JobStage>,
    pub outcome: JobOutcome,
    pub cleanup: CleanupReport,
}

/// Success summary shown to the requester.
pub fn success_summary(receipt: &DispatchReceipt) -> String {
    format!(
        "{SUCCESS_PREFIX}\n\nDelivered {} via {}.",
        human_bytes(receipt.bytes),
        receipt.target.as_str().replace('_', " ")
    )
}

/// Records stage transitions, their timings, and their log lines.
struct StageTracker {
    logger: JobLogger,
    history: Vec<JobStage>,
    entered_at: Instant,
}

impl StageTracker {
    fn new(logger: JobLogger) -> Self {
        Self {
            logger,
            history: Vec::new(),
            entered_at: Instant::now(),
        }
    }

    fn current(&self) -> JobStage {
        self.history.last().copied().unwrap_or_default()
    }

    fn enter(&mut self, stage: JobStage) {
        let now = Instant::now();
        if let Some(previous) = self.history.last() {
            metrics::record_stage_duration(*previous, now.duration_since(self.entered_at));
        }
        self.entered_at = now;
        self.history.push(stage);
        self.logger.log_stage(stage);
    }

    /// Move to the stage that follows the current one on the happy path.
    fn advance(&mut self) -> JobResult<JobStage> {
        let current = self.current();
        let next = current
            .next()
            .ok_or_else(|| JobError::internal(format!("no stage follows {current}")))?;
        self.enter(next);
        Ok(next)
    }

    fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.enter(JobStage::Failed);
        }
    }
}

fn ensure_active(cancel: &CancelReceiver) -> JobResult<()> {
    if is_cancelled(cancel) {
        return Err(JobError::Cancelled);
    }
    Ok(())
}

async fn output_size(path: &Path) -> JobResult<u64> {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|e| JobError::upload(format!("output unreadable: {e}")))
}

/// Runs admitted jobs from acquisition through cleanup.
pub struct JobPipeline {
    config: Arc<WorkerConfig>,
    transport: Arc<dyn Transport>,
    acquirer: AssetAcquirer,
    probe: MetadataProbe,
    watermark: WatermarkProcessor,
    thumbnails: ThumbnailGenerator,
    dispatcher: ResultDispatcher,
    cleanup: CleanupCoordinator,
}

impl JobPipeline {
    pub fn new(
        config: Arc<WorkerConfig>,
        transport: Arc<dyn Transport>,
        gate: Arc<AdmissionGate>,
    ) -> Self {
        let watermark = WatermarkProcessor::new(&config.ffmpeg_path, config.encoding())
            .with_poll_interval(config.progress_poll_interval)
            .with_timeout(config.transcode_timeout);
        let dispatcher = ResultDispatcher::new(
            Arc::clone(&transport),
            config.large_file_threshold,
            config.allow_large_file_host,
        );

        Self {
            acquirer: AssetAcquirer::new(Arc::clone(&transport)),
            probe: MetadataProbe::new(&config.ffprobe_path).with_timeout(config.transcode_timeout),
            thumbnails: ThumbnailGenerator::new(&config.ffmpeg_path)
                .with_timeout(config.transcode_timeout),
            watermark,
            dispatcher,
            cleanup: CleanupCoordinator::new(gate),
            transport,
            config,
        }
    }

    pub fn with_large_host(mut self, host: Arc<dyn LargeFileHost>) -> Self {
        self.dispatcher = self.dispatcher.with_large_host(host);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cleanup(&self) -> &CleanupCoordinator {
        &self.cleanup
    }

    /// Run an admitted job to a terminal stage, then clean up.
    ///
    /// The caller must already hold admission for `request.requester_id`.
    pub async fn run(&self, request: JobRequest, cancel: CancelReceiver) -> JobReport {
        let logger = JobLogger::new(&request.job_id, request.requester_id);
        let span = logger.create_span();
        self.run_inner(request, cancel, logger).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: JobRequest,
        cancel: CancelReceiver,
        logger: JobLogger,
    ) -> JobReport {
        let chat = request.requester_id;
        let job_dir = self.config.job_dir(chat);
        logger.log_start(&format!("source {}", request.source.file_id));

        let mut tracker = StageTracker::new(logger.clone());
        tracker.enter(JobStage::Acquiring);
        let result = self
            .execute(&request, &cancel, &mut tracker)
            .await
            .and_then(|delivered| tracker.advance().map(|_| delivered));

        let (outcome, message) = match result {
            Ok((receipt, thumbnail_attached)) => {
                metrics::record_job_outcome("done");
                logger.log_completion(&format!(
                    "delivered {} bytes via {}",
                    receipt.bytes,
                    receipt.target.as_str()
                ));
                let message = success_summary(&receipt);
                (
                    JobOutcome::Done {
                        receipt,
                        thumbnail_attached,
                    },
                    message,
                )
            }
            Err(error) => {
                let stage = tracker.current();
                logger.log_error(stage, &error.to_string());
                tracker.fail();
                metrics::record_job_outcome(error.kind().as_str());
                let message = error.user_message();
                (JobOutcome::Failed { stage, error }, message)
            }
        };

        self.notify(chat, request.status_message_id, &message).await;
        let cleanup = self.cleanup.run(chat, &job_dir).await;

        JobReport {
            job_id: request.job_id,
            stages: tracker.history,
            outcome,
            cleanup,
        }
    }

    /// Drive the happy path. Any error ends the job in the current stage.
    async fn execute(
        &self,
        request: &JobRequest,
        cancel: &CancelReceiver,
        tracker: &mut StageTracker,
    ) -> JobResult<(DispatchReceipt, bool)> {
        let chat = request.requester_id;
        let job_dir = self.config.job_dir(chat);

        let relay = self.relay(request);
        let on_download = self.transfer_status(&relay, "Downloading...");
        let downloaded = self
            .acquirer
            .acquire(&request.source, &job_dir, on_download, Some(cancel.clone()))
            .await;
        relay.finish().await;
        let source = downloaded?;

        ensure_active(cancel)?;
        tracker.advance()?;
        let asset = self.probe.probe(&source, Some(cancel.clone())).await;

        ensure_active(cancel)?;
        tracker.advance()?;
        let job = WatermarkJob {
            output: watermarked_output_path(&source, &job_dir),
            input: source,
            watermark_image: self.config.watermark_image_path(chat),
            settings: request.settings,
            progress_file: WorkerConfig::progress_file(&job_dir),
        };
        let relay = self.relay(request);
        let publisher = relay.publisher();
        let total_ms = asset.duration_ms();
        let rendered = self
            .watermark
            .apply(&job, Some(cancel.clone()), move |progress| {
                publisher.publish(render_transcode(&progress, total_ms))
            })
            .await;
        relay.finish().await;
        let output = rendered.map_err(JobError::from_transcode)?;

        tracker.advance()?;
        let output_asset = self.probe.probe(&output, Some(cancel.clone())).await;
        ensure_active(cancel)?;
        self.notify(
            chat,
            request.status_message_id,
            "Watermark rendered.\n\nPreparing to upload...",
        )
        .await;

        tracker.advance()?;
        let thumbnail_path = job_dir.join(format!("thumb_{}.jpg", Utc::now().timestamp_millis()));
        let thumbnail: Option<PathBuf> = match self
            .thumbnails
            .generate(
                &output,
                &thumbnail_path,
                output_asset.duration_secs,
                output_asset.width,
                output_asset.height,
                Some(cancel.clone()),
            )
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                let error = JobError::from_thumbnail(e);
                if error.is_fatal() {
                    return Err(error);
                }
                tracker.logger.log_warning(&error.to_string());
                None
            }
        };

        ensure_active(cancel)?;
        tracker.advance()?;
        let file_size = output_size(&output).await?;
        let metadata = UploadMetadata::from_asset(&output_asset, file_size);
        let relay = self.relay(request);
        let on_upload = self.transfer_status(&relay, "Uploading...");
        let dispatched = self
            .dispatcher
            .dispatch(
                chat,
                &output,
                thumbnail.as_deref(),
                &metadata,
                on_upload,
                Some(cancel.clone()),
            )
            .await;
        relay.finish().await;

        Ok((dispatched?, thumbnail.is_some()))
    }

    fn relay(&self, request: &JobRequest) -> StatusRelay {
        StatusRelay::spawn(
            Arc::clone(&self.transport),
            request.requester_id,
            request.status_message_id,
            self.config.status_interval,
        )
    }

    fn transfer_status(&self, relay: &StatusRelay, title: &'static str) -> TransferCallback {
        let publisher = relay.publisher();
        throttle_transfer(
            Arc::new(move |progress| publisher.publish(render_transfer(title, &progress))),
            self.config.progress_poll_interval,
        )
    }

    /// Best-effort status edit; a failed edit is logged, not fatal.
    pub async fn notify(&self, chat: RequesterId, message: MessageId, text: &str) {
        if let Err(e) = self.transport.edit_message(chat, message, text).await {
            tracing::warn!(chat, message, error = %e, "Failed to update status message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionScope;
    use crate::local::LocalTransport;
    use tempfile::TempDir;
    use wmark_media::cancel_channel;
    use wmark_models::{AdmissionMarker, UploadTarget};

    #[test]
    fn test_success_summary() {
        let text = success_summary(&DispatchReceipt {
            target: UploadTarget::Direct,
            location: "x".into(),
            bytes: 2048,
        });
        assert!(text.starts_with(SUCCESS_PREFIX));
        assert!(text.contains("2.00 KiB"));
    }

    #[test]
    fn test_tracker_records_order() {
        let mut tracker = StageTracker::new(JobLogger::new(&JobId::new(), 1));
        assert_eq!(tracker.current(), JobStage::Idle);
        tracker.enter(JobStage::Acquiring);
        tracker.enter(JobStage::Failed);
        assert_eq!(tracker.history, vec![JobStage::Acquiring, JobStage::Failed]);
    }

    #[test]
    fn test_tracker_advances_along_happy_path() {
        let mut tracker = StageTracker::new(JobLogger::new(&JobId::new(), 1));
        assert!(tracker.advance().is_err());

        tracker.enter(JobStage::Acquiring);
        while tracker.current() != JobStage::Done {
            tracker.advance().unwrap();
        }
        assert_eq!(tracker.history.len(), 7);
        assert!(tracker.advance().is_err());

        tracker.fail();
        assert_eq!(tracker.current(), JobStage::Done);
    }

    #[tokio::test]
    async fn test_unreadable_output_is_an_upload_failure() {
        let err = output_size(Path::new("/nonexistent/out_watermarked.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::JobErrorKind::UploadFailure);
    }

    #[tokio::test]
    async fn test_download_failure_fails_in_acquiring_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let config = Arc::new(WorkerConfig::default().with_download_dir(root.path()));
        let transport = Arc::new(LocalTransport::new(root.path().join("outbox")));
        let gate = Arc::new(AdmissionGate::new(config.working_dir(), AdmissionScope::Global));

        let message = transport.send_message(5, "Downloading Video...").await.unwrap();
        assert!(gate.try_acquire(&AdmissionMarker::new(5, message)).await.unwrap());

        let pipeline = JobPipeline::new(config.clone(), transport.clone(), gate.clone());
        let (_tx, rx) = cancel_channel();
        let report = pipeline
            .run(
                JobRequest {
                    job_id: JobId::new(),
                    requester_id: 5,
                    status_message_id: message,
                    source: SourceRef::new("/nonexistent/video.mp4"),
                    settings: WatermarkSettings::default(),
                },
                rx,
            )
            .await;

        match &report.outcome {
            JobOutcome::Failed { stage, error } => {
                assert_eq!(*stage, JobStage::Acquiring);
                assert!(matches!(error, JobError::Download(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(report.stages, vec![JobStage::Acquiring, JobStage::Failed]);
        assert!(!gate.is_held(5).await);
        assert!(!config.job_dir(5).exists());
        assert!(transport
            .message_text(message)
            .unwrap()
            .starts_with("Unable to download the video!"));
    }
}
