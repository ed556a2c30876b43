//! Request handling on top of the pipeline.
//!
//! Every video submission ends in exactly one user-visible outcome: a
//! rejection reply, or the final edit of the job's status message.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::admission::AdmissionGate;
use crate::config::WorkerConfig;
use crate::error::{JobError, JobResult, TransportError};
use crate::metrics;
use crate::pipeline::{JobOutcome, JobPipeline, JobReport, JobRequest};
use crate::transport::{ignore_progress, LargeFileHost, PreferenceStore, SourceRef, Transport};
use wmark_media::{cancel_channel, CancelSender};
use wmark_models::{
    AdmissionMarker, JobId, JobStage, RequesterId, WatermarkPosition, WatermarkSettings,
    WatermarkSize,
};

/// Result of a video submission.
#[derive(Debug)]
pub enum Submission {
    /// Turned away before admission; nothing was downloaded or created.
    Rejected(JobError),
    /// Admitted and run to a terminal stage.
    Completed(JobReport),
}

impl Submission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Submission::Rejected(_))
    }
}

/// Text of the settings menu.
pub fn render_settings(settings: &WatermarkSettings) -> String {
    format!(
        "Here you can set your Watermark Settings:\n\nPosition: {}\nSize: {}",
        settings.position.label(),
        settings.size.label()
    )
}

pub struct WatermarkService {
    config: Arc<WorkerConfig>,
    transport: Arc<dyn Transport>,
    preferences: Arc<dyn PreferenceStore>,
    gate: Arc<AdmissionGate>,
    pipeline: Arc<JobPipeline>,
    active: Mutex<HashMap<RequesterId, CancelSender>>,
}

impl WatermarkService {
    pub fn new(
        config: WorkerConfig,
        transport: Arc<dyn Transport>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let config = Arc::new(config);
        let gate = Arc::new(AdmissionGate::new(config.working_dir(), config.admission_scope));
        let pipeline = Arc::new(JobPipeline::new(
            Arc::clone(&config),
            Arc::clone(&transport),
            Arc::clone(&gate),
        ));

        Self {
            config,
            transport,
            preferences,
            gate,
            pipeline,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_large_host(mut self, host: Arc<dyn LargeFileHost>) -> Self {
        self.pipeline = Arc::new(
            JobPipeline::new(
                Arc::clone(&self.config),
                Arc::clone(&self.transport),
                Arc::clone(&self.gate),
            )
            .with_large_host(host),
        );
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Handle a submitted video.
    ///
    /// `Err` is returned only when the requester could not be told anything
    /// at all (the transport refused the first reply).
    pub async fn submit_video(
        &self,
        requester: RequesterId,
        source: SourceRef,
    ) -> JobResult<Submission> {
        let watermark = self.config.watermark_image_path(requester);
        if !tokio::fs::try_exists(&watermark).await.unwrap_or(false) {
            return self.reject(requester, JobError::NoWatermark).await;
        }
        if self.gate.is_held(requester).await {
            return self.reject(requester, JobError::Busy).await;
        }

        let settings = self.settings(requester).await;
        let message = self
            .transport
            .send_message(requester, "Downloading Video...")
            .await?;

        match self
            .gate
            .try_acquire(&AdmissionMarker::new(requester, message))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Lost the race to another submission after the first check.
                metrics::record_rejection(JobError::Busy.kind().as_str());
                self.pipeline
                    .notify(requester, message, &JobError::Busy.user_message())
                    .await;
                return Ok(Submission::Rejected(JobError::Busy));
            }
            Err(e) => {
                let error = JobError::Io(e);
                self.pipeline
                    .notify(requester, message, &error.user_message())
                    .await;
                return Ok(Submission::Rejected(error));
            }
        }

        let request = JobRequest {
            job_id: JobId::new(),
            requester_id: requester,
            status_message_id: message,
            source,
            settings,
        };
        let job_id = request.job_id.clone();
        info!(job_id = %job_id, requester_id = requester, "Job admitted");

        let (cancel_tx, cancel_rx) = cancel_channel();
        self.active.lock().await.insert(requester, cancel_tx);

        let pipeline = Arc::clone(&self.pipeline);
        let joined = tokio::spawn(async move { pipeline.run(request, cancel_rx).await }).await;
        self.active.lock().await.remove(&requester);

        match joined {
            Ok(report) => Ok(Submission::Completed(report)),
            Err(e) => {
                // The job task died without reaching a terminal stage.
                let error = JobError::internal(format!("job task failed: {e}"));
                warn!(job_id = %job_id, error = %error, "Job aborted unexpectedly");
                metrics::record_job_outcome(error.kind().as_str());
                self.pipeline
                    .notify(requester, message, &error.user_message())
                    .await;
                let cleanup = self
                    .pipeline
                    .cleanup()
                    .run(requester, &self.config.job_dir(requester))
                    .await;
                Ok(Submission::Completed(JobReport {
                    job_id,
                    stages: vec![JobStage::Failed],
                    outcome: JobOutcome::Failed {
                        stage: JobStage::Failed,
                        error,
                    },
                    cleanup,
                }))
            }
        }
    }

    async fn reject(&self, requester: RequesterId, error: JobError) -> JobResult<Submission> {
        info!(
            requester_id = requester,
            reason = error.kind().as_str(),
            "Request rejected"
        );
        metrics::record_rejection(error.kind().as_str());
        self.transport
            .send_message(requester, &error.user_message())
            .await?;
        Ok(Submission::Rejected(error))
    }

    /// Store an image as the requester's watermark.
    pub async fn set_watermark(
        &self,
        requester: RequesterId,
        image: SourceRef,
    ) -> JobResult<PathBuf> {
        let message = self
            .transport
            .send_message(requester, "Downloading Image...")
            .await?;

        let dest = self.config.watermark_image_path(requester);
        let staging = dest.with_file_name(".incoming");
        let stored = async {
            let downloaded = self
                .transport
                .download_to(&image, &staging, ignore_progress())
                .await?
                .ok_or_else(|| TransportError::transfer("transport returned no file"))?;
            tokio::fs::rename(&downloaded, &dest).await?;
            Ok::<_, TransportError>(())
        }
        .await;
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "Failed to remove staging dir");
            }
        }

        match stored {
            Ok(()) => {
                info!(requester_id = requester, path = %dest.display(), "Watermark stored");
                self.pipeline
                    .notify(
                        requester,
                        message,
                        "This image will be used as watermark!\n\nNow send any video to add watermark.",
                    )
                    .await;
                Ok(dest)
            }
            Err(e) => {
                self.pipeline
                    .notify(requester, message, &format!("Failed to download image: {e}"))
                    .await;
                Err(JobError::download(e.to_string()))
            }
        }
    }

    /// Effective settings. Store failures and unknown values fall back to
    /// defaults.
    pub async fn settings(&self, requester: RequesterId) -> WatermarkSettings {
        let position = self.preferences.position(requester).await.unwrap_or_else(|e| {
            warn!(requester_id = requester, error = %e, "Position lookup failed");
            None
        });
        let size = self.preferences.size(requester).await.unwrap_or_else(|e| {
            warn!(requester_id = requester, error = %e, "Size lookup failed");
            None
        });
        WatermarkSettings::resolve(position.as_deref(), size.as_deref())
    }

    pub async fn set_position(
        &self,
        requester: RequesterId,
        position: WatermarkPosition,
    ) -> JobResult<WatermarkSettings> {
        self.preferences
            .set_position(requester, position.as_str())
            .await?;
        Ok(self.settings(requester).await)
    }

    pub async fn set_size(
        &self,
        requester: RequesterId,
        size: WatermarkSize,
    ) -> JobResult<WatermarkSettings> {
        self.preferences
            .set_size(requester, &size.to_string())
            .await?;
        Ok(self.settings(requester).await)
    }

    pub async fn reset_settings(&self, requester: RequesterId) -> JobResult<WatermarkSettings> {
        self.preferences.reset(requester).await?;
        Ok(self.settings(requester).await)
    }

    /// Marker of the job currently holding the requester's scope.
    pub async fn status(&self, requester: RequesterId) -> Option<AdmissionMarker> {
        self.gate.current(requester).await
    }

    /// Request cancellation of the requester's running job.
    ///
    /// Returns `false` when the requester has nothing running here.
    pub async fn cancel(&self, requester: RequesterId) -> bool {
        match self.active.lock().await.get(&requester) {
            Some(tx) => {
                info!(requester_id = requester, "Cancellation requested");
                tx.send(true).is_ok()
            }
            None => false,
        }
    }
}
