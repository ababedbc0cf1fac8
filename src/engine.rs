// SPDX-License-Identifier: GPL-3.0-only

//! Color-science engine boundary
//!
//! The demosaic/denoise/merge work happens in an external engine reached
//! over a foreign-function boundary; this module defines the seam the
//! pipeline talks through. Requests carry packed pixels plus the
//! correlated sensor metadata; the engine answers with a status code —
//! `0` processed on the GPU, `1` processed on the CPU after a GPU
//! failure (a partial success worth distinguishing), negative values are
//! failures.

use crate::constants::ENGINE_DEBUG_STATS_LEN;
use crate::correlator::CaptureMetadata;
use crate::frame::SensorRotation;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Engine completion status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Processed on the GPU path (code 0)
    SuccessGpu,
    /// GPU path failed, CPU fallback produced the output (code 1)
    SuccessCpuFallback,
    /// Engine failed with the given negative code
    Failure(i32),
}

impl EngineStatus {
    /// Interpret a raw engine status code
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => EngineStatus::SuccessGpu,
            1 => EngineStatus::SuccessCpuFallback,
            other => EngineStatus::Failure(other),
        }
    }

    /// The raw status code
    pub fn code(&self) -> i32 {
        match self {
            EngineStatus::SuccessGpu => 0,
            EngineStatus::SuccessCpuFallback => 1,
            EngineStatus::Failure(code) => *code,
        }
    }

    /// True for both the GPU path and the CPU fallback
    pub fn is_success(&self) -> bool {
        !matches!(self, EngineStatus::Failure(_))
    }
}

/// Output files a dispatch may produce
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputPaths {
    /// Linear TIFF output
    pub tiff: Option<PathBuf>,
    /// Display-referred JPEG output
    pub jpg: Option<PathBuf>,
    /// Linear DNG output
    pub dng: Option<PathBuf>,
}

impl OutputPaths {
    /// Every configured path, for persistence after dispatch
    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        [self.tiff.as_ref(), self.jpg.as_ref(), self.dng.as_ref()]
            .into_iter()
            .flatten()
    }
}

/// A single-frame dispatch request
#[derive(Debug)]
pub struct SingleDispatch<'a> {
    /// Tightly packed pixel data
    pub pixels: &'a [u8],
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row pitch of the packed buffer in bytes
    pub packed_stride: u32,
    /// Sensor rotation to bake into the output
    pub rotation: SensorRotation,
    /// Correlated sensor metadata (levels, WB, CCM, CFA)
    pub metadata: &'a CaptureMetadata,
    /// Target log curve index (-1 = none)
    pub target_log_index: i32,
    /// Active LUT file
    pub lut_path: Option<&'a Path>,
    /// Output files to produce
    pub outputs: &'a OutputPaths,
    /// Try the GPU path first
    pub use_gpu: bool,
}

/// A burst dispatch request: N packed frames merged into one output
#[derive(Debug)]
pub struct BurstDispatch<'a> {
    /// Packed frame buffers in capture order
    pub frames: Vec<&'a [u8]>,
    /// Width in pixels (shared by all frames)
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row pitch of the packed buffers in bytes
    pub packed_stride: u32,
    /// Sensor rotation to bake into the output
    pub rotation: SensorRotation,
    /// Correlated sensor metadata for the reference frame
    pub metadata: &'a CaptureMetadata,
    /// Digital gain compensating the planned underexposure
    pub digital_gain: f32,
    /// Wall-clock capture time, milliseconds since the epoch
    pub capture_time_ms: i64,
    /// Target log curve index (-1 = none)
    pub target_log_index: i32,
    /// Active LUT file
    pub lut_path: Option<&'a Path>,
    /// Output files to produce
    pub outputs: &'a OutputPaths,
    /// Try the GPU path first
    pub use_gpu: bool,
}

/// Per-stage engine timings, filled by the burst call
pub type EngineDebugStats = [i64; ENGINE_DEBUG_STATS_LEN];

/// The external color-science engine.
///
/// Calls are synchronous: the processing worker is the only caller and a
/// dispatch occupies it until the engine returns.
pub trait ColorEngine: Send + Sync {
    /// Process one packed frame into the configured outputs
    fn process_single(&self, request: &SingleDispatch<'_>) -> EngineStatus;

    /// Merge a burst of packed frames into the configured outputs,
    /// reporting per-stage timings through `debug_stats`
    fn process_burst(
        &self,
        request: &BurstDispatch<'_>,
        debug_stats: &mut EngineDebugStats,
    ) -> EngineStatus;
}

/// Engine stand-in that accepts every dispatch without producing output.
///
/// Used by the demo CLI when no real engine is linked, and by tests that
/// exercise the pipeline around the engine call.
#[derive(Debug, Default)]
pub struct NullEngine;

impl ColorEngine for NullEngine {
    fn process_single(&self, request: &SingleDispatch<'_>) -> EngineStatus {
        debug!(
            width = request.width,
            height = request.height,
            bytes = request.pixels.len(),
            "Null engine swallowed single frame"
        );
        EngineStatus::SuccessCpuFallback
    }

    fn process_burst(
        &self,
        request: &BurstDispatch<'_>,
        _debug_stats: &mut EngineDebugStats,
    ) -> EngineStatus {
        debug!(
            frames = request.frames.len(),
            width = request.width,
            height = request.height,
            digital_gain = request.digital_gain,
            "Null engine swallowed burst"
        );
        EngineStatus::SuccessCpuFallback
    }
}
