// SPDX-License-Identifier: GPL-3.0-only

//! Exposure planning for burst capture
//!
//! Burst merging trades intentional underexposure (to protect highlights
//! and freeze motion) against digital gain applied after the merge. The
//! planner here implements that "exposure factorization": pick how much
//! light to collect, then split it across ISO and shutter time in stages
//! that prefer short exposures.
//!
//! Two entry points:
//! - [`calculate_exposure`] plans from the auto-exposure's current ISO
//!   and shutter (open-loop, used right before a burst trigger).
//! - [`calculate_closed_loop`] plans from a measured frame luma against a
//!   mid-gray set-point, and is wrapped by [`ExposureController`] which
//!   smooths the result over time so preview exposure converges instead
//!   of oscillating.

use crate::constants::{
    MAX_DIGITAL_GAIN, REFERENCE_SHUTTER_NS, STAGE_ISO_HEADROOM, STAGE_SPLIT_EXPONENT,
    STAGE_TIME_LIMIT_NS, TARGET_LUMA,
};
use std::ops::RangeInclusive;
use tracing::trace;

/// One exposure plan: sensor settings plus the gain that compensates the
/// planned underexposure. Produced fresh per request, never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureConfig {
    /// Target ISO
    pub iso: u32,
    /// Target exposure time in nanoseconds
    pub exposure_time_ns: u64,
    /// Digital gain to apply after capture
    pub digital_gain: f32,
}

/// Dynamic underexposure factor for a scene, keyed by the ISO the
/// auto-exposure chose for it.
///
/// Bright scenes (low ISO) can afford deep underexposure to recover
/// highlights; dark scenes (high ISO) get none:
/// - ISO <= 50: 0.0625 (-4 EV)
/// - ISO 50..=100: interpolated -4 EV to -3 EV
/// - ISO 100..800: interpolated -3 EV to 0 EV
/// - ISO >= 800: 1.0 (0 EV)
fn underexposure_factor(reference_iso: u32) -> f32 {
    if reference_iso <= 50 {
        0.0625
    } else if reference_iso <= 100 {
        let ratio = (reference_iso - 50) as f32 / (100.0 - 50.0);
        0.0625 + ratio * (0.125 - 0.0625)
    } else if reference_iso >= 800 {
        1.0
    } else {
        let ratio = (reference_iso - 100) as f32 / (800.0 - 100.0);
        0.125 + ratio * (1.0 - 0.125)
    }
}

/// Calculate the burst exposure plan from the current auto-exposure state.
///
/// `current_iso` and `current_time_ns` describe the light the scene is
/// getting right now; their product is the baseline total exposure
/// (aperture assumed fixed). The result is deterministic in its inputs.
pub fn calculate_exposure(
    current_iso: u32,
    current_time_ns: u64,
    iso_range: &RangeInclusive<u32>,
    time_range: &RangeInclusive<u64>,
) -> ExposureConfig {
    let baseline_total_exposure = current_iso as f64 * current_time_ns as f64;
    factorize(baseline_total_exposure, current_iso, iso_range, time_range)
}

/// Calculate an exposure plan that would bring a measured average luma to
/// `target_luma`.
///
/// The measured luma and the exposure that produced it give the scene's
/// luma-per-exposure-unit; inverting that yields the baseline needed to
/// hit the set-point. A pitch-black measurement falls back to the
/// camera's maximum exposure. The reference ISO for the underexposure
/// heuristic is estimated from the baseline assuming a 10 ms shutter.
pub fn calculate_closed_loop(
    current_iso: u32,
    current_time_ns: u64,
    measured_luma: f64,
    target_luma: f64,
    iso_range: &RangeInclusive<u32>,
    time_range: &RangeInclusive<u64>,
) -> ExposureConfig {
    let safe_time = current_time_ns.max(1);
    let current_exposure = current_iso as f64 * safe_time as f64;

    let brightness_factor = if measured_luma > 0.001 {
        measured_luma / current_exposure
    } else {
        0.0
    };

    let baseline_total_exposure = if brightness_factor > 1e-12 {
        target_luma / brightness_factor
    } else {
        // Pitch black: ask for everything the camera has
        *iso_range.end() as f64 * *time_range.end() as f64
    };

    let estimated_iso = ((baseline_total_exposure / REFERENCE_SHUTTER_NS) as u32)
        .clamp(*iso_range.start(), *iso_range.end());

    factorize(baseline_total_exposure, estimated_iso, iso_range, time_range)
}

/// Split a target total exposure across ISO and shutter time.
///
/// Three ordered stages, each entered only while the achieved exposure is
/// still short of the target:
/// - Stage A: hold ISO at minimum, raise time up to 8 ms.
/// - Stage B: hold time at 8 ms, raise ISO up to 4x the minimum.
/// - Stage C: distribute the remaining gap multiplicatively across both,
///   log-balanced (square-root split), clamped to the camera's ranges.
fn factorize(
    baseline_total_exposure: f64,
    reference_iso: u32,
    iso_range: &RangeInclusive<u32>,
    time_range: &RangeInclusive<u64>,
) -> ExposureConfig {
    let min_iso = *iso_range.start();
    let max_iso = *iso_range.end();
    let min_time = *time_range.start();
    let max_time = *time_range.end();

    // Cap digital gain at 16x; the heuristic bottoms out at 1/16 already,
    // so this is a floor against future curve changes
    let factor = underexposure_factor(reference_iso).max(1.0 / MAX_DIGITAL_GAIN);
    let target_total_exposure = baseline_total_exposure * factor as f64;
    let digital_gain = 1.0 / factor;

    let time_limit = STAGE_TIME_LIMIT_NS;
    let iso_limit = min_iso * STAGE_ISO_HEADROOM;

    // Stage A: spend time first, ISO stays at minimum
    let needed_time = (target_total_exposure / min_iso as f64) as u64;
    let mut target_iso = min_iso;
    let mut target_time = needed_time.max(min_time).min(time_limit);

    if (target_iso as f64 * target_time as f64) < target_total_exposure {
        // Stage B: time locked at 8 ms, spend ISO headroom
        let needed_iso = (target_total_exposure / time_limit as f64) as u32;
        target_iso = needed_iso.max(min_iso).min(iso_limit);
        target_time = time_limit;

        if (target_iso as f64 * target_time as f64) < target_total_exposure {
            // Stage C: split what is left across both axes
            let remaining = target_total_exposure / (target_iso as f64 * target_time as f64);
            let split = remaining.powf(STAGE_SPLIT_EXPONENT);

            target_iso = ((target_iso as f64 * split) as u32)
                .max(min_iso)
                .min(max_iso);
            target_time = ((target_time as f64 * split) as u64)
                .max(min_time)
                .min(max_time);
        }
    }

    trace!(
        reference_iso,
        target_iso,
        target_time,
        digital_gain,
        "Exposure factorized"
    );

    ExposureConfig {
        iso: target_iso,
        exposure_time_ns: target_time,
        digital_gain,
    }
}

/// Closed-loop exposure controller with EMA smoothing.
///
/// Owns the smoothing state for exactly one capture session. Each
/// [`update`](Self::update) computes the instant plan for the mid-gray
/// set-point and folds it into the smoothed state;
/// [`reset`](Self::reset) returns to the uninitialized sentinel so the
/// next update adopts its target directly.
#[derive(Debug)]
pub struct ExposureController {
    smoothing_factor: f64,
    smoothed_iso: f64,
    smoothed_time_ns: f64,
    smoothed_gain: f64,
}

impl ExposureController {
    /// Create a controller with the given EMA factor
    pub fn new(smoothing_factor: f64) -> Self {
        Self {
            smoothing_factor,
            smoothed_iso: -1.0,
            smoothed_time_ns: -1.0,
            smoothed_gain: 1.0,
        }
    }

    /// Fold a new luma measurement into the smoothed exposure plan
    pub fn update(
        &mut self,
        measured_luma: f64,
        current_iso: u32,
        current_time_ns: u64,
        iso_range: &RangeInclusive<u32>,
        time_range: &RangeInclusive<u64>,
    ) -> ExposureConfig {
        let target = calculate_closed_loop(
            current_iso,
            current_time_ns,
            measured_luma,
            TARGET_LUMA,
            iso_range,
            time_range,
        );

        // First sample after construction or reset adopts the target
        if self.smoothed_iso < 0.0 {
            self.smoothed_iso = target.iso as f64;
            self.smoothed_time_ns = target.exposure_time_ns as f64;
            self.smoothed_gain = target.digital_gain as f64;
            return target;
        }

        let alpha = self.smoothing_factor;
        self.smoothed_iso = alpha * target.iso as f64 + (1.0 - alpha) * self.smoothed_iso;
        self.smoothed_time_ns =
            alpha * target.exposure_time_ns as f64 + (1.0 - alpha) * self.smoothed_time_ns;
        self.smoothed_gain = alpha * target.digital_gain as f64 + (1.0 - alpha) * self.smoothed_gain;

        ExposureConfig {
            iso: self.smoothed_iso as u32,
            exposure_time_ns: self.smoothed_time_ns as u64,
            digital_gain: self.smoothed_gain as f32,
        }
    }

    /// Clear the smoothing state back to the uninitialized sentinel
    pub fn reset(&mut self) {
        self.smoothed_iso = -1.0;
        self.smoothed_time_ns = -1.0;
        self.smoothed_gain = 1.0;
    }
}

impl Default for ExposureController {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_SMOOTHING_FACTOR)
    }
}
