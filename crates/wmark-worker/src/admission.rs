//! Single-flight admission.
//!
//! A job holds its scope from the moment `try_acquire` succeeds until
//! cleanup calls `release`. The hold is an on-disk marker so that `status`
//! can report it and so a second process sharing the download directory
//! sees it too. Acquisition is a compare-and-swap: the marker is written
//! to a temporary file and hard-linked into place, which fails if another
//! holder got there first.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use wmark_models::{AdmissionMarker, RequesterId};

/// Granularity of the single-flight rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionScope {
    /// One job at a time across all requesters
    #[default]
    Global,
    /// One job at a time per requester
    PerRequester,
}

impl FromStr for AdmissionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "global" => Ok(AdmissionScope::Global),
            "per_requester" | "requester" => Ok(AdmissionScope::PerRequester),
            other => Err(format!("unknown admission scope: {other}")),
        }
    }
}

/// Marker-file gate guarding the pipeline.
#[derive(Debug)]
pub struct AdmissionGate {
    working_dir: PathBuf,
    scope: AdmissionScope,
    held: Mutex<HashSet<PathBuf>>,
}

impl AdmissionGate {
    pub fn new(working_dir: impl Into<PathBuf>, scope: AdmissionScope) -> Self {
        Self {
            working_dir: working_dir.into(),
            scope,
            held: Mutex::new(HashSet::new()),
        }
    }

    pub fn scope(&self) -> AdmissionScope {
        self.scope
    }

    /// Marker path governing `requester`.
    pub fn marker_path(&self, requester: RequesterId) -> PathBuf {
        match self.scope {
            AdmissionScope::Global => self.working_dir.join("status.json"),
            AdmissionScope::PerRequester => {
                self.working_dir.join(format!("status-{requester}.json"))
            }
        }
    }

    /// Whether a job currently holds the scope governing `requester`.
    pub async fn is_held(&self, requester: RequesterId) -> bool {
        let path = self.marker_path(requester);
        if self.held.lock().await.contains(&path) {
            return true;
        }
        tokio::fs::try_exists(&path).await.unwrap_or(false)
    }

    /// Marker of the job holding the scope governing `requester`, if any.
    pub async fn current(&self, requester: RequesterId) -> Option<AdmissionMarker> {
        let bytes = tokio::fs::read(self.marker_path(requester)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(error = %e, "Unreadable admission marker");
                None
            }
        }
    }

    /// Atomically claim the scope governing `marker.requester_id`.
    ///
    /// Returns `Ok(false)` without side effects when the scope is already
    /// held.
    pub async fn try_acquire(&self, marker: &AdmissionMarker) -> io::Result<bool> {
        let path = self.marker_path(marker.requester_id);
        let mut held = self.held.lock().await;
        if held.contains(&path) || tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.working_dir).await?;
        let staging = self.working_dir.join(format!(
            ".status-{}-{}.tmp",
            marker.requester_id,
            marker.progress_message_id
        ));
        let body = serde_json::to_vec(marker).map_err(io::Error::other)?;
        tokio::fs::write(&staging, body).await?;

        let linked = tokio::fs::hard_link(&staging, &path).await;
        let _ = tokio::fs::remove_file(&staging).await;
        match linked {
            Ok(()) => {
                held.insert(path);
                debug!(requester_id = marker.requester_id, "Admission acquired");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release the scope governing `requester`. Releasing a free scope is a
    /// no-op.
    pub async fn release(&self, requester: RequesterId) -> io::Result<()> {
        let path = self.marker_path(requester);
        let mut held = self.held.lock().await;
        held.remove(&path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(requester_id = requester, "Admission released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_second_acquire_is_rejected() {
        let dir = TempDir::new().unwrap();
        let gate = AdmissionGate::new(dir.path().join("WatermarkAdder"), AdmissionScope::Global);

        assert!(gate.try_acquire(&AdmissionMarker::new(1, 10)).await.unwrap());
        assert!(!gate.try_acquire(&AdmissionMarker::new(2, 20)).await.unwrap());
        assert!(gate.is_held(2).await);

        let current = gate.current(2).await.unwrap();
        assert_eq!(current.requester_id, 1);
        assert_eq!(current.progress_message_id, 10);

        gate.release(1).await.unwrap();
        assert!(!gate.is_held(1).await);
        assert!(gate.try_acquire(&AdmissionMarker::new(2, 20)).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let gate = AdmissionGate::new(dir.path(), AdmissionScope::Global);
        gate.release(1).await.unwrap();
        gate.release(1).await.unwrap();
    }

    #[tokio::test]
    async fn test_per_requester_scope() {
        let dir = TempDir::new().unwrap();
        let gate = AdmissionGate::new(dir.path(), AdmissionScope::PerRequester);

        assert!(gate.try_acquire(&AdmissionMarker::new(1, 10)).await.unwrap());
        assert!(gate.try_acquire(&AdmissionMarker::new(2, 20)).await.unwrap());
        assert!(!gate.try_acquire(&AdmissionMarker::new(1, 11)).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_admits_exactly_one() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(AdmissionGate::new(dir.path(), AdmissionScope::Global));

        let attempts = (0..16).map(|i| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.try_acquire(&AdmissionMarker::new(i, i)).await.unwrap() })
        });
        let admitted = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_marker_from_another_process_blocks() {
        let dir = TempDir::new().unwrap();
        let gate = AdmissionGate::new(dir.path(), AdmissionScope::Global);
        tokio::fs::write(
            gate.marker_path(9),
            r#"{"requesterId":9,"progressMessageId":3}"#,
        )
        .await
        .unwrap();

        assert!(gate.is_held(1).await);
        assert!(!gate.try_acquire(&AdmissionMarker::new(1, 1)).await.unwrap());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("global".parse::<AdmissionScope>().unwrap(), AdmissionScope::Global);
        assert_eq!(
            "per-requester".parse::<AdmissionScope>().unwrap(),
            AdmissionScope::PerRequester
        );
        assert!("nope".parse::<AdmissionScope>().is_err());
    }
}
