// SPDX-License-Identifier: MPL-2.0

//! rawburst - raw-sensor capture and burst assembly for computational
//! photography
//!
//! This library takes raw sensor frames from a platform capture
//! collaborator, packs them into tightly-strided pooled buffers,
//! correlates each frame with its capture metadata, plans exposure
//! bracketing for burst capture and hands complete, ordered units of
//! work to an external color-science engine under bounded concurrency.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`buffer_pool`]: pooled off-heap-style byte buffers reused across frames
//! - [`packer`]: stride-aware frame packing
//! - [`correlator`]: timestamp-keyed capture-metadata cache
//! - [`exposure`]: exposure factorization and closed-loop smoothing
//! - [`capture`]: the capture collaborator boundary
//! - [`engine`]: the external color-engine boundary
//! - [`pipelines`]: burst assembly, admission control, orchestration
//! - [`storage`]: asset persistence after dispatch
//! - [`config`]: pipeline configuration

pub mod buffer_pool;
pub mod capture;
pub mod config;
pub mod constants;
pub mod correlator;
pub mod engine;
pub mod errors;
pub mod exposure;
pub mod frame;
pub mod packer;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use capture::{CaptureControl, CaptureEvent, FrameDelivery, SourceAck, SyntheticCapture};
pub use config::CaptureConfig;
pub use correlator::{CaptureMetadata, MetadataCorrelator};
pub use engine::{ColorEngine, EngineStatus};
pub use errors::{PipelineError, PipelineResult};
pub use exposure::{ExposureConfig, ExposureController, calculate_exposure};
pub use frame::{BurstSet, RawFrame, SensorRotation};
pub use packer::{FramePacker, PlaneDescriptor};
pub use pipelines::{CaptureOutcome, PipelineCommand, PipelineOrchestrator};
