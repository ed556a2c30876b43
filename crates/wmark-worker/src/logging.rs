//! Structured job logging utilities.
//!
//! Every pipeline event carries the job id and requester so a single job
//! can be followed through the logs.

use tracing::{error, info, warn, Span};
use wmark_models::{JobId, JobStage, RequesterId};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    requester_id: RequesterId,
}

impl JobLogger {
    pub fn new(job_id: &JobId, requester_id: RequesterId) -> Self {
        Self {
            job_id: job_id.to_string(),
            requester_id,
        }
    }

    /// Log the start of a job.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            requester_id = self.requester_id,
            "Job started: {}", message
        );
    }

    /// Log a stage transition.
    pub fn log_stage(&self, stage: JobStage) {
        info!(
            job_id = %self.job_id,
            requester_id = self.requester_id,
            stage = stage.as_str(),
            "Job stage"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            requester_id = self.requester_id,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, stage: JobStage, message: &str) {
        error!(
            job_id = %self.job_id,
            requester_id = self.requester_id,
            stage = stage.as_str(),
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            requester_id = self.requester_id,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn requester_id(&self) -> RequesterId {
        self.requester_id
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            requester_id = self.requester_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, 42);

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.requester_id(), 42);
    }
}
