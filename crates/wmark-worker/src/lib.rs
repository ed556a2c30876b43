//! Watermark job worker.
//!
//! This crate provides:
//! - Single-flight admission backed by an on-disk marker
//! - The staged job pipeline from download to dispatch
//! - Rate-limited progress relay into the requester's status message
//! - Guaranteed cleanup on every terminal outcome
//! - A filesystem transport for local runs and tests

pub mod acquire;
pub mod admission;
pub mod cleanup;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod local;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod service;
pub mod status;
pub mod transport;

pub use admission::{AdmissionGate, AdmissionScope};
pub use config::WorkerConfig;
pub use error::{JobError, JobErrorKind, JobResult, TransportError, TransportResult};
pub use local::{DirectoryHost, InMemoryPreferences, LocalTransport};
pub use logging::JobLogger;
pub use pipeline::{JobOutcome, JobPipeline, JobReport, JobRequest};
pub use service::{Submission, WatermarkService};
pub use transport::{
    DispatchReceipt, LargeFileHost, PreferenceStore, SourceRef, TransferCallback, Transport,
};
