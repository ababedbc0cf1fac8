// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

use std::time::Duration;

/// Maximum number of released buffers the pool retains for reuse.
/// Buffers released beyond this bound are dropped instead of cached.
pub const MAX_POOL_SIZE: usize = 10;

/// Capacity of the capture-metadata correlation cache. When a record
/// insertion exceeds this, the oldest-inserted entry is evicted.
pub const METADATA_CACHE_CAPACITY: usize = 300;

/// Timestamp tolerance for correlating a frame with its metadata record (5 ms)
pub const METADATA_MATCH_TOLERANCE_NS: i64 = 5_000_000;

/// Poll interval while waiting for a late metadata record
pub const METADATA_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Maximum metadata poll attempts before giving up (~5 s total budget)
pub const METADATA_MAX_ATTEMPTS: u32 = 25;

/// Concurrently in-flight processing units admitted past the gate
pub const PROCESSING_CONCURRENCY: usize = 2;

/// Capacity of the bounded hand-off queue feeding the processing worker
pub const HANDOFF_QUEUE_CAPACITY: usize = 2;

/// Default number of frames per burst
pub const DEFAULT_BURST_FRAME_COUNT: usize = 3;

/// Stage A ceiling for exposure time: short shutters freeze motion, so
/// the factorization spends time first but never past 8 ms on its own
pub const STAGE_TIME_LIMIT_NS: u64 = 8_000_000;

/// Stage B ceiling for ISO, as a multiple of the camera's minimum ISO
pub const STAGE_ISO_HEADROOM: u32 = 4;

/// Stage C splits the remaining exposure gap between ISO and time;
/// 0.5 is the log-balanced square-root split
pub const STAGE_SPLIT_EXPONENT: f64 = 0.5;

/// Hard cap on digital gain (16x), i.e. underexposure never exceeds -4 EV
pub const MAX_DIGITAL_GAIN: f32 = 16.0;

/// Average-luma set-point for closed-loop exposure (mid-gray on 8-bit)
pub const TARGET_LUMA: f64 = 110.0;

/// Shutter assumed when mapping a total-exposure target back to an
/// equivalent ISO for the underexposure heuristic (10 ms)
pub const REFERENCE_SHUTTER_NS: f64 = 10_000_000.0;

/// Default EMA smoothing factor for the closed-loop exposure controller
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.15;

/// Slots in the engine's debug-timing output array
pub const ENGINE_DEBUG_STATS_LEN: usize = 15;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_budget_is_about_five_seconds() {
        let budget = METADATA_POLL_INTERVAL * METADATA_MAX_ATTEMPTS;
        assert_eq!(budget, Duration::from_secs(5));
    }

    #[test]
    fn test_gain_cap_matches_deepest_underexposure() {
        // -4 EV is a factor of 1/16, the floor of the underexposure curve
        assert_eq!(MAX_DIGITAL_GAIN, 16.0);
    }
}
