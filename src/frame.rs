// SPDX-License-Identifier: GPL-3.0-only

//! Frame and burst types shared across the pipeline

use crate::buffer_pool::PooledBuffer;
use std::path::PathBuf;

/// Sensor rotation in degrees (clockwise)
///
/// Camera sensors may be physically mounted at various angles relative to
/// the device, commonly 90° or 270° on mobile hardware. The value arrives
/// with each frame delivery and is forwarded to the engine untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorRotation {
    /// No rotation (sensor is oriented correctly)
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    /// 180 degrees (upside down)
    Rotate180,
    /// 270 degrees clockwise (90 degrees counter-clockwise)
    Rotate270,
}

impl SensorRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => SensorRotation::Rotate90,
            180 => SensorRotation::Rotate180,
            270 => SensorRotation::Rotate270,
            _ => SensorRotation::None,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            SensorRotation::None => 0,
            SensorRotation::Rotate90 => 90,
            SensorRotation::Rotate180 => 180,
            SensorRotation::Rotate270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, SensorRotation::Rotate90 | SensorRotation::Rotate270)
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// One captured sensor frame, tightly packed.
///
/// Created by the packer on frame arrival; ownership moves into a burst
/// accumulator or a dispatch unit from there. The pooled buffer returns to
/// its pool exactly once, when the frame is dropped after final
/// consumption or on abort.
#[derive(Debug)]
pub struct RawFrame {
    /// Packed pixel data (row padding removed)
    pub buffer: PooledBuffer,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel (2 for RAW16)
    pub pixel_stride: u32,
    /// Monotonic sensor timestamp, nanoseconds, unique within a session
    pub timestamp_ns: i64,
    /// Sensor rotation reported with the frame
    pub rotation: SensorRotation,
    /// Physical sub-sensor that produced the frame (multi-camera rigs)
    pub physical_sensor_id: Option<String>,
}

impl RawFrame {
    /// Row pitch of the packed buffer in bytes
    pub fn packed_stride(&self) -> u32 {
        self.width * self.pixel_stride
    }

    /// Total packed payload size in bytes
    pub fn packed_len(&self) -> usize {
        self.packed_stride() as usize * self.height as usize
    }
}

/// Shared output parameters for a burst
#[derive(Debug, Clone, PartialEq)]
pub struct BurstParams {
    /// Digital gain compensating the planned underexposure
    pub digital_gain: f32,
    /// Target log curve index forwarded to the engine (-1 = none)
    pub target_log_index: i32,
    /// Active LUT forwarded to the engine
    pub lut_path: Option<PathBuf>,
}

/// An ordered, complete set of burst frames plus shared output parameters.
///
/// Only ever built from a completed accumulator, so `frames` holds exactly
/// the configured burst frame count. Partial sets are discarded with all
/// buffers released, never dispatched.
#[derive(Debug)]
pub struct BurstSet {
    /// Frames in capture order
    pub frames: Vec<RawFrame>,
    /// Shared output parameters
    pub params: BurstParams,
}

impl BurstSet {
    /// Number of frames in the set
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Timestamp of the first (reference) frame
    pub fn reference_timestamp_ns(&self) -> i64 {
        self.frames.first().map_or(0, |f| f.timestamp_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(SensorRotation::from_degrees(0), SensorRotation::None);
        assert_eq!(SensorRotation::from_degrees(90), SensorRotation::Rotate90);
        assert_eq!(SensorRotation::from_degrees(180), SensorRotation::Rotate180);
        assert_eq!(SensorRotation::from_degrees(270), SensorRotation::Rotate270);
        // Normalisation
        assert_eq!(SensorRotation::from_degrees(450), SensorRotation::Rotate90);
        assert_eq!(SensorRotation::from_degrees(-90), SensorRotation::Rotate270);
        // Off-grid values fall back to no rotation
        assert_eq!(SensorRotation::from_degrees(45), SensorRotation::None);
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        assert!(!SensorRotation::None.swaps_dimensions());
        assert!(SensorRotation::Rotate90.swaps_dimensions());
        assert!(!SensorRotation::Rotate180.swaps_dimensions());
        assert!(SensorRotation::Rotate270.swaps_dimensions());
    }
}
