//! Job identity, pipeline stages, and the admission marker record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of the user who submitted a job.
pub type RequesterId = i64;

/// Identifier of a status message inside the requester's chat.
pub type MessageId = i64;

/// Unique identifier for a job run, used to correlate logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage of a watermarking job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Idle,
    Acquiring,
    Probing,
    Watermarking,
    ProbingOutput,
    ThumbnailGen,
    Dispatching,
    Done,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Idle => "idle",
            JobStage::Acquiring => "acquiring",
            JobStage::Probing => "probing",
            JobStage::Watermarking => "watermarking",
            JobStage::ProbingOutput => "probing_output",
            JobStage::ThumbnailGen => "thumbnail_gen",
            JobStage::Dispatching => "dispatching",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }

    /// The stage that follows a successful run of `self`.
    ///
    /// Terminal stages and `Idle` have no successor on the happy path;
    /// `Idle` only leaves through admission.
    pub fn next(&self) -> Option<JobStage> {
        match self {
            JobStage::Idle => None,
            JobStage::Acquiring => Some(JobStage::Probing),
            JobStage::Probing => Some(JobStage::Watermarking),
            JobStage::Watermarking => Some(JobStage::ProbingOutput),
            JobStage::ProbingOutput => Some(JobStage::ThumbnailGen),
            JobStage::ThumbnailGen => Some(JobStage::Dispatching),
            JobStage::Dispatching => Some(JobStage::Done),
            JobStage::Done | JobStage::Failed => None,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Contents of the admission marker file.
///
/// Its presence on disk means a job holds the scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionMarker {
    pub requester_id: RequesterId,
    pub progress_message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
}

impl AdmissionMarker {
    pub fn new(requester_id: RequesterId, progress_message_id: MessageId) -> Self {
        Self {
            requester_id,
            progress_message_id,
            acquired_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sequence() {
        let mut stage = JobStage::Acquiring;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                JobStage::Acquiring,
                JobStage::Probing,
                JobStage::Watermarking,
                JobStage::ProbingOutput,
                JobStage::ThumbnailGen,
                JobStage::Dispatching,
                JobStage::Done,
            ]
        );
        assert!(stage.is_terminal());
    }

    #[test]
    fn test_marker_field_names() {
        let marker = AdmissionMarker {
            requester_id: 42,
            progress_message_id: 7,
            acquired_at: None,
        };
        let json = serde_json::to_string(&marker).unwrap();
        assert_eq!(json, r#"{"requesterId":42,"progressMessageId":7}"#);

        let parsed: AdmissionMarker = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, marker);
    }
}
