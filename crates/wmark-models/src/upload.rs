//! Upload routing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default size above which the large-file host may be used (~1.95 GiB).
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 2_097_152_000;

/// Where a finished output is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadTarget {
    /// Straight back through the messaging transport
    Direct,
    /// Through the pluggable large-file host
    LargeFileHost,
}

impl UploadTarget {
    /// Pick a target from the output size.
    ///
    /// The large-file host is chosen only when the file is strictly larger
    /// than `threshold` and the host is enabled.
    pub fn select(file_size: u64, threshold: u64, large_host_enabled: bool) -> Self {
        if large_host_enabled && file_size > threshold {
            UploadTarget::LargeFileHost
        } else {
            UploadTarget::Direct
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadTarget::Direct => "direct",
            UploadTarget::LargeFileHost => "large_file_host",
        }
    }
}
