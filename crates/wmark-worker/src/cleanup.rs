//! End-of-job cleanup.
//!
//! Runs exactly once per admitted job, whatever the outcome: removes the
//! job's working directory and releases admission. The requester's stored
//! watermark lives outside the job directory and is left alone.

use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::admission::AdmissionGate;
use wmark_models::RequesterId;

/// What cleanup managed to do. Cleanup never fails the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub work_dir_removed: bool,
    pub admission_released: bool,
}

pub struct CleanupCoordinator {
    gate: Arc<AdmissionGate>,
}

impl CleanupCoordinator {
    pub fn new(gate: Arc<AdmissionGate>) -> Self {
        Self { gate }
    }

    /// Delete a work directory. A directory that is already gone counts as
    /// removed.
    pub async fn cleanup_work_dir(work_dir: &Path) -> io::Result<()> {
        match tokio::fs::remove_dir_all(work_dir).await {
            Ok(()) => {
                info!("Cleaned up work directory: {}", work_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn run(&self, requester: RequesterId, work_dir: &Path) -> CleanupReport {
        let work_dir_removed = match Self::cleanup_work_dir(work_dir).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %work_dir.display(), error = %e, "Failed to remove work directory");
                false
            }
        };

        let admission_released = match self.gate.release(requester).await {
            Ok(()) => true,
            Err(e) => {
                warn!(requester_id = requester, error = %e, "Failed to release admission");
                false
            }
        };

        CleanupReport {
            work_dir_removed,
            admission_released,
        }
    }
}
