//! Probed media file facts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Width used when the container does not report one.
pub const DEFAULT_WIDTH: u32 = 1280;
/// Height used when the container does not report one.
pub const DEFAULT_HEIGHT: u32 = 720;

/// A media file with the metadata the pipeline needs.
///
/// Duration is whole seconds and `0` when unknown; downstream stages must
/// tolerate that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub duration_secs: u64,
    pub width: u32,
    pub height: u32,
}

impl MediaAsset {
    /// Asset with every metadata field at its default.
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration_secs: 0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.duration_secs as i64).saturating_mul(1000)
    }
}

/// Metadata attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UploadMetadata {
    pub duration_secs: u64,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
}

impl UploadMetadata {
    pub fn from_asset(asset: &MediaAsset, file_size: u64) -> Self {
        Self {
            duration_secs: asset.duration_secs,
            width: asset.width,
            height: asset.height,
            file_size,
        }
    }
}
