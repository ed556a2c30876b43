//! Job metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder
//! these calls are no-ops.

use metrics::{counter, histogram};
use std::time::Duration;

use wmark_models::JobStage;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "wmark_jobs_total";
    pub const STAGE_DURATION_SECONDS: &str = "wmark_stage_duration_seconds";
    pub const REJECTIONS_TOTAL: &str = "wmark_rejections_total";
}

/// Record a terminal job outcome (`done` or an error kind).
pub fn record_job_outcome(outcome: &'static str) {
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record how long a stage ran.
pub fn record_stage_duration(stage: JobStage, elapsed: Duration) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str())
        .record(elapsed.as_secs_f64());
}

/// Record a request turned away before admission.
pub fn record_rejection(reason: &'static str) {
    counter!(names::REJECTIONS_TOTAL, "reason" => reason).increment(1);
}
