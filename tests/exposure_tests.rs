// SPDX-License-Identifier: MPL-2.0

//! Integration tests for exposure planning scenarios

use rawburst::calculate_exposure;

#[test]
fn test_bright_daylight_plan() {
    // A bright scene metered at ISO 40: deepest underexposure (-4 EV)
    // with 16x gain to claw the brightness back after the merge
    let plan = calculate_exposure(40, 1_000_000, &(50..=1600), &(1_000..=500_000_000));
    assert_eq!(plan.digital_gain, 16.0);
}

#[test]
fn test_indoor_burst_plan() {
    // The canonical indoor burst: ISO 100, camera floor at 1 ms. The
    // factor lands on -3 EV (8x gain), ISO stays at the range floor and
    // the needed shutter clamps to the camera's minimum window
    let plan = calculate_exposure(100, 1_000_000, &(100..=3200), &(1_000_000..=500_000_000));
    assert_eq!(plan.iso, 100);
    assert_eq!(plan.exposure_time_ns, 1_000_000);
    assert!((plan.digital_gain - 8.0).abs() < 1e-6);
}

#[test]
fn test_night_plan_spends_everything() {
    // Night scene at the ISO ceiling: no underexposure, and the
    // factorization pushes both axes well past the motion-freeze stage
    let plan = calculate_exposure(1600, 250_000_000, &(50..=1600), &(1_000..=500_000_000));
    assert_eq!(plan.digital_gain, 1.0);
    assert!(plan.exposure_time_ns > 8_000_000);
    assert!(plan.iso > 200);
}

#[test]
fn test_plan_is_deterministic() {
    let a = calculate_exposure(320, 4_000_000, &(50..=1600), &(1_000..=500_000_000));
    let b = calculate_exposure(320, 4_000_000, &(50..=1600), &(1_000..=500_000_000));
    assert_eq!(a, b);
}
