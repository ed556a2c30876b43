//! Shared data models for the watermark pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Watermark position and size settings
//! - Job identity, stages, and the admission marker
//! - Probed media metadata
//! - Transfer progress and upload routing

pub mod encoding;
pub mod job;
pub mod media;
pub mod progress;
pub mod settings;
pub mod upload;

pub use encoding::EncodingConfig;
pub use job::{AdmissionMarker, JobId, JobStage, MessageId, RequesterId};
pub use media::{MediaAsset, UploadMetadata, DEFAULT_HEIGHT, DEFAULT_WIDTH};
pub use progress::TransferProgress;
pub use settings::{SettingParseError, WatermarkPosition, WatermarkSettings, WatermarkSize};
pub use upload::{UploadTarget, DEFAULT_LARGE_FILE_THRESHOLD};
