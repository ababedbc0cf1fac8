// SPDX-License-Identifier: GPL-3.0-only

use crate::constants;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Policy for the metadata-correlation wait
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetadataWaitPolicy {
    /// Timestamp tolerance in nanoseconds
    pub tolerance_ns: i64,
    /// Interval between poll attempts in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum poll attempts before reporting a timeout
    pub max_attempts: u32,
}

impl MetadataWaitPolicy {
    /// Poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MetadataWaitPolicy {
    fn default() -> Self {
        Self {
            tolerance_ns: constants::METADATA_MATCH_TOLERANCE_NS,
            poll_interval_ms: constants::METADATA_POLL_INTERVAL.as_millis() as u64,
            max_attempts: constants::METADATA_MAX_ATTEMPTS,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Frames per burst
    pub burst_frame_count: usize,
    /// Admission permits for concurrently in-flight units
    pub concurrency_limit: usize,
    /// Capacity of the hand-off queue to the processing worker
    pub queue_capacity: usize,
    /// Maximum buffers retained by the pool
    pub pool_size: usize,
    /// Metadata-correlation wait policy
    pub metadata_wait: MetadataWaitPolicy,
    /// EMA smoothing factor for closed-loop exposure
    pub smoothing_factor: f64,
    /// Target log curve index forwarded to the engine (-1 = none)
    pub target_log_index: i32,
    /// Active LUT file forwarded to the engine
    pub lut_path: Option<PathBuf>,
    /// Directory processed outputs are persisted under
    pub output_dir: Option<PathBuf>,
    /// Persist the TIFF output
    pub save_tiff: bool,
    /// Persist the JPEG output
    pub save_jpg: bool,
    /// Ask the engine for the GPU path first
    pub use_gpu: bool,
    /// Attempt a single-shot fallback when burst processing fails
    pub burst_fallback: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            burst_frame_count: constants::DEFAULT_BURST_FRAME_COUNT,
            concurrency_limit: constants::PROCESSING_CONCURRENCY,
            queue_capacity: constants::HANDOFF_QUEUE_CAPACITY,
            pool_size: constants::MAX_POOL_SIZE,
            metadata_wait: MetadataWaitPolicy::default(),
            smoothing_factor: constants::DEFAULT_SMOOTHING_FACTOR,
            target_log_index: -1, // No log curve
            lut_path: None,
            output_dir: None, // Resolved to the pictures directory at runtime
            save_tiff: true,
            save_jpg: true,
            use_gpu: false,
            burst_fallback: true,
        }
    }
}

impl CaptureConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(std::io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wait_budget() {
        let config = CaptureConfig::default();
        let wait = config.metadata_wait;
        assert_eq!(wait.tolerance_ns, 5_000_000);
        assert_eq!(wait.poll_interval(), Duration::from_millis(200));
        assert_eq!(wait.max_attempts, 25);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = CaptureConfig {
            burst_frame_count: 5,
            lut_path: Some(PathBuf::from("/tmp/test.cube")),
            ..CaptureConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CaptureConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
