// SPDX-License-Identifier: GPL-3.0-only

//! Capture-metadata correlation
//!
//! Sensor metadata (white balance, color matrix, levels, CFA layout)
//! arrives on the capture-result path, decoupled from the frames
//! themselves. Frames and records meet again here, keyed by the sensor
//! timestamp. The cache is bounded: insertion order is tracked and the
//! oldest record is evicted once the cache is over capacity, so a
//! long-running preview session cannot grow it without bound.

use crate::config::MetadataWaitPolicy;
use crate::errors::CorrelationError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Color-filter-array layout of the sensor, as the platform reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CfaPattern {
    /// Row 0: R G, Row 1: G B
    #[default]
    Rggb,
    /// Row 0: G R, Row 1: B G
    Grbg,
    /// Row 0: G B, Row 1: R G
    Gbrg,
    /// Row 0: B G, Row 1: G R
    Bggr,
}

impl CfaPattern {
    /// Engine-side pattern code (matches the platform enum ordering)
    pub fn code(&self) -> i32 {
        match self {
            CfaPattern::Rggb => 0,
            CfaPattern::Grbg => 1,
            CfaPattern::Gbrg => 2,
            CfaPattern::Bggr => 3,
        }
    }
}

/// Sensor metadata for one captured frame
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMetadata {
    /// White-balance gains [R, G_even, G_odd, B]
    pub neutral_wb: [f32; 4],
    /// 3x3 color-correction matrix, row-major
    pub color_matrix: [f32; 9],
    /// Sensor white level
    pub white_level: u32,
    /// Sensor black level
    pub black_level: u32,
    /// Color-filter-array layout
    pub cfa_pattern: CfaPattern,
    /// ISO applied for the frame
    pub iso: u32,
    /// Exposure time applied for the frame, nanoseconds
    pub exposure_time_ns: u64,
    /// Lens aperture
    pub f_number: f32,
    /// Lens focal length in millimetres
    pub focal_length_mm: f32,
}

impl Default for CaptureMetadata {
    fn default() -> Self {
        // Conservative stand-ins used when the platform reports nothing,
        // matching a typical 10-bit sensor
        Self {
            neutral_wb: [2.0, 1.0, 1.0, 1.5],
            color_matrix: [2.0, -1.0, 0.0, -0.5, 2.0, -0.5, 0.0, -1.0, 2.0],
            white_level: 1023,
            black_level: 64,
            cfa_pattern: CfaPattern::default(),
            iso: 100,
            exposure_time_ns: 10_000_000,
            f_number: 1.8,
            focal_length_mm: 0.0,
        }
    }
}

struct CorrelatorInner {
    /// Records in insertion order (front = oldest)
    entries: VecDeque<(i64, CaptureMetadata)>,
    capacity: usize,
}

/// Bounded timestamp-keyed metadata cache shared between the
/// capture-result writer and the processing worker.
///
/// Each lookup runs under the lock, so tolerance scans always see a
/// consistent snapshot even while eviction is racing them.
#[derive(Clone)]
pub struct MetadataCorrelator {
    inner: Arc<Mutex<CorrelatorInner>>,
}

impl MetadataCorrelator {
    /// Create a correlator retaining at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CorrelatorInner {
                entries: VecDeque::new(),
                capacity,
            })),
        }
    }

    /// Insert a metadata record, evicting the oldest-inserted entries
    /// once the cache is over capacity. Re-recording a timestamp updates
    /// the record in place without refreshing its age.
    pub fn record(&self, timestamp_ns: i64, metadata: CaptureMetadata) {
        let mut inner = self.inner.lock().expect("correlator lock poisoned");
        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|(ts, _)| *ts == timestamp_ns)
        {
            entry.1 = metadata;
            return;
        }
        inner.entries.push_back((timestamp_ns, metadata));
        while inner.entries.len() > inner.capacity {
            if let Some((evicted, _)) = inner.entries.pop_front() {
                trace!(timestamp_ns = evicted, "Evicted oldest metadata record");
            }
        }
    }

    /// Find the record for `timestamp_ns`.
    ///
    /// An exact key match wins. Failing that, all entries are scanned for
    /// ones within `tolerance_ns`; the smallest |delta| wins and equal
    /// deltas resolve to the earliest-inserted entry, so the result does
    /// not depend on map iteration order.
    pub fn lookup(&self, timestamp_ns: i64, tolerance_ns: i64) -> Option<CaptureMetadata> {
        let inner = self.inner.lock().expect("correlator lock poisoned");

        if let Some((_, meta)) = inner.entries.iter().find(|(ts, _)| *ts == timestamp_ns) {
            return Some(meta.clone());
        }

        let mut best: Option<(i64, &CaptureMetadata)> = None;
        for (ts, meta) in &inner.entries {
            let delta = (ts - timestamp_ns).abs();
            if delta < tolerance_ns && best.map_or(true, |(d, _)| delta < d) {
                best = Some((delta, meta));
            }
        }
        best.map(|(_, meta)| meta.clone())
    }

    /// Wait for a record to show up, polling [`lookup`](Self::lookup) at
    /// the policy's interval for up to its attempt budget.
    ///
    /// The wait suspends cooperatively between polls; it never blocks a
    /// thread, and callers cancel it by dropping the future. Running out
    /// of attempts is a [`CorrelationError::Timeout`] attributable to the
    /// timestamp — callers must surface it, not treat it as success.
    pub async fn wait_for_match(
        &self,
        timestamp_ns: i64,
        policy: &MetadataWaitPolicy,
    ) -> Result<CaptureMetadata, CorrelationError> {
        for attempt in 0..policy.max_attempts {
            if let Some(meta) = self.lookup(timestamp_ns, policy.tolerance_ns) {
                if attempt > 0 {
                    debug!(timestamp_ns, attempt, "Metadata arrived late");
                }
                return Ok(meta);
            }
            tokio::time::sleep(policy.poll_interval()).await;
        }
        debug!(
            timestamp_ns,
            attempts = policy.max_attempts,
            "Metadata wait exhausted"
        );
        Err(CorrelationError::Timeout { timestamp_ns })
    }

    /// Number of cached records
    pub fn len(&self) -> usize {
        self.inner.lock().expect("correlator lock poisoned").entries.len()
    }

    /// True if no records are cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached record
    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("correlator lock poisoned")
            .entries
            .clear();
    }
}

impl std::fmt::Debug for MetadataCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCorrelator")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_iso(iso: u32) -> CaptureMetadata {
        CaptureMetadata {
            iso,
            ..CaptureMetadata::default()
        }
    }

    #[test]
    fn test_exact_lookup() {
        let correlator = MetadataCorrelator::new(300);
        correlator.record(1_000, meta_with_iso(200));
        let found = correlator.lookup(1_000, 5_000_000).unwrap();
        assert_eq!(found.iso, 200);
    }

    #[test]
    fn test_tolerance_lookup_prefers_closest() {
        let correlator = MetadataCorrelator::new(300);
        correlator.record(1_000_000, meta_with_iso(100));
        correlator.record(1_003_000, meta_with_iso(400));

        // 1_002_000 is within 5ms of both; 1_003_000 is closer
        let found = correlator.lookup(1_002_000, 5_000_000).unwrap();
        assert_eq!(found.iso, 400);
    }

    #[test]
    fn test_exact_match_beats_closer_scan_order() {
        let correlator = MetadataCorrelator::new(300);
        correlator.record(999, meta_with_iso(50));
        correlator.record(1_000, meta_with_iso(800));
        let found = correlator.lookup(1_000, 5_000_000).unwrap();
        assert_eq!(found.iso, 800);
    }

    #[test]
    fn test_out_of_tolerance_misses() {
        let correlator = MetadataCorrelator::new(300);
        correlator.record(0, meta_with_iso(100));
        assert!(correlator.lookup(10_000_000, 5_000_000).is_none());
    }

    #[test]
    fn test_eviction_drops_oldest_inserted() {
        let correlator = MetadataCorrelator::new(300);
        for i in 0..301i64 {
            correlator.record(i * 1_000_000_000, meta_with_iso(i as u32));
        }
        assert_eq!(correlator.len(), 300);
        // Entry 0 is gone, entry 1 survives
        assert!(correlator.lookup(0, 1).is_none());
        assert!(correlator.lookup(1_000_000_000, 1).is_some());
    }

    #[test]
    fn test_rerecord_updates_in_place() {
        let correlator = MetadataCorrelator::new(300);
        correlator.record(42, meta_with_iso(100));
        correlator.record(42, meta_with_iso(640));
        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.lookup(42, 1).unwrap().iso, 640);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_match_finds_late_record() {
        let correlator = MetadataCorrelator::new(300);
        let policy = MetadataWaitPolicy::default();

        let writer = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(600)).await;
            writer.record(7_000, meta_with_iso(320));
        });

        let found = correlator.wait_for_match(7_000, &policy).await.unwrap();
        assert_eq!(found.iso, 320);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_match_times_out() {
        let correlator = MetadataCorrelator::new(300);
        let policy = MetadataWaitPolicy::default();

        let err = correlator.wait_for_match(9_999, &policy).await.unwrap_err();
        assert_eq!(err, CorrelationError::Timeout { timestamp_ns: 9_999 });
    }
}
