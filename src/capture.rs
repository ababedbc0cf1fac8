// SPDX-License-Identifier: GPL-3.0-only

//! Capture collaborator boundary
//!
//! The platform camera stack lives outside this crate. It talks to the
//! pipeline through two seams: a bounded channel of [`CaptureEvent`]s
//! (frame deliveries and per-frame metadata), and the [`CaptureControl`]
//! trait for exposure queries and frame requests going the other way.
//!
//! Each delivered frame carries a [`SourceAck`]: the pipeline signals
//! "done with source" exactly once per frame, no later than when packing
//! finishes, so the collaborator can recycle its own buffer. The ack
//! fires on drop as well, so no error path can forget it.
//!
//! [`SyntheticCapture`] is an in-process collaborator producing gradient
//! planes with configurable stride padding — the pipeline's equivalent of
//! pointing the app at a file instead of a camera. Tests and the demo
//! CLI run entire sessions against it.

use crate::correlator::CaptureMetadata;
use crate::exposure::ExposureConfig;
use crate::frame::SensorRotation;
use crate::packer::PlaneDescriptor;
use async_stream::stream;
use futures::Stream;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Capacity of the capture event channel feeding the orchestrator
pub const CAPTURE_EVENT_QUEUE_CAPACITY: usize = 16;

/// Once-only "done with source" acknowledgment for a delivered frame.
///
/// Firing consumes the ack; an ack that is never fired explicitly fires
/// itself when dropped. Either way the collaborator hears back exactly
/// once.
#[derive(Debug)]
pub struct SourceAck(Option<oneshot::Sender<()>>);

impl SourceAck {
    /// Create an ack and the receiver the collaborator listens on
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// Signal that the source plane is no longer needed
    pub fn fire(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for SourceAck {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// One frame delivery from the capture collaborator
#[derive(Debug)]
pub struct FrameDelivery {
    /// The source plane, possibly row-padded
    pub plane: Vec<u8>,
    /// Plane geometry
    pub descriptor: PlaneDescriptor,
    /// Sensor timestamp, nanoseconds
    pub timestamp_ns: i64,
    /// Sensor rotation
    pub rotation: SensorRotation,
    /// Physical sub-sensor that produced the frame
    pub physical_sensor_id: Option<String>,
    /// Fired exactly once when the pipeline is done with `plane`
    pub ack: SourceAck,
}

/// Events flowing from the capture collaborator into the orchestrator
#[derive(Debug)]
pub enum CaptureEvent {
    /// A sensor frame arrived
    Frame(FrameDelivery),
    /// A capture-result metadata record arrived
    Metadata {
        /// Sensor timestamp the record belongs to
        timestamp_ns: i64,
        /// The record itself
        metadata: CaptureMetadata,
    },
    /// The preview analysis measured an average luma; drives the
    /// closed-loop exposure controller
    LumaMeasured {
        /// Average luma on the 0-255 scale
        luma: f64,
    },
}

/// Control surface of the capture collaborator
pub trait CaptureControl: Send + Sync {
    /// Camera-reported ISO and exposure-time bounds
    fn exposure_limits(&self) -> (RangeInclusive<u32>, RangeInclusive<u64>);

    /// ISO and exposure time the auto-exposure is currently running
    fn current_exposure(&self) -> (u32, u64);

    /// Pin the sensor to an explicit exposure plan
    fn apply_exposure(&self, config: &ExposureConfig);

    /// Request one frame; it arrives later as a [`CaptureEvent::Frame`]
    fn request_frame(&self);
}

struct SyntheticState {
    iso: u32,
    exposure_time_ns: u64,
    next_timestamp_ns: i64,
}

/// In-process capture collaborator for tests and the demo CLI.
///
/// Produces RAW16 gradient planes with the configured stride padding and
/// a matching metadata record for every frame, timestamps advancing at
/// ~30 fps. The synthetic scene has a fixed luma-per-exposure response,
/// so closed-loop exposure runs against it converge like they would
/// against a real sensor.
pub struct SyntheticCapture {
    descriptor: PlaneDescriptor,
    iso_range: RangeInclusive<u32>,
    time_range: RangeInclusive<u64>,
    /// Scene response: average luma produced per ISO·ns of exposure
    luma_per_exposure: f64,
    state: Mutex<SyntheticState>,
    /// Deliveries funnel through one unbounded queue and one pump task,
    /// so frames reach the orchestrator in request order even when the
    /// bounded event channel pushes back
    pump_tx: mpsc::UnboundedSender<CaptureEvent>,
    acked_frames: Arc<AtomicUsize>,
    delivered_frames: AtomicU64,
}

impl SyntheticCapture {
    /// Create a synthetic collaborator feeding `events`.
    /// Must be called inside a tokio runtime (spawns the delivery pump).
    pub fn new(descriptor: PlaneDescriptor, events: mpsc::Sender<CaptureEvent>) -> Arc<Self> {
        let (pump_tx, mut pump_rx) = mpsc::unbounded_channel::<CaptureEvent>();
        tokio::spawn(async move {
            while let Some(event) = pump_rx.recv().await {
                if events.send(event).await.is_err() {
                    warn!("Orchestrator gone, synthetic delivery pump stopping");
                    break;
                }
            }
        });

        Arc::new(Self {
            descriptor,
            iso_range: 50..=1600,
            time_range: 1_000..=500_000_000,
            luma_per_exposure: 110.0 / (100.0 * 10_000_000.0),
            state: Mutex::new(SyntheticState {
                iso: 100,
                exposure_time_ns: 10_000_000,
                next_timestamp_ns: 1_000_000_000,
            }),
            pump_tx,
            acked_frames: Arc::new(AtomicUsize::new(0)),
            delivered_frames: AtomicU64::new(0),
        })
    }

    /// Frames whose source ack has fired
    pub fn acked_frames(&self) -> usize {
        self.acked_frames.load(Ordering::Relaxed)
    }

    /// Frames delivered so far
    pub fn delivered_frames(&self) -> u64 {
        self.delivered_frames.load(Ordering::Relaxed)
    }

    /// Average luma a frame captured right now would measure
    pub fn measured_luma(&self) -> f64 {
        let state = self.state.lock().expect("synthetic state lock poisoned");
        let exposure = state.iso as f64 * state.exposure_time_ns as f64;
        (self.luma_per_exposure * exposure).min(255.0)
    }

    /// Build one padded source plane: a row-major gradient with 0xFF
    /// bytes in the stride padding, so packing bugs show up in tests
    fn make_plane(&self, timestamp_ns: i64) -> Vec<u8> {
        let desc = &self.descriptor;
        let row_len = desc.packed_row_len();
        let mut plane = vec![0xFFu8; desc.row_stride as usize * desc.height as usize];
        for y in 0..desc.height as usize {
            let start = y * desc.row_stride as usize;
            for (x, byte) in plane[start..start + row_len].iter_mut().enumerate() {
                *byte = ((timestamp_ns as usize).wrapping_add(y * row_len + x)) as u8;
            }
        }
        plane
    }

    fn metadata_for(&self, state: &SyntheticState) -> CaptureMetadata {
        CaptureMetadata {
            iso: state.iso,
            exposure_time_ns: state.exposure_time_ns,
            ..CaptureMetadata::default()
        }
    }

    /// A continuous preview stream of luma measurements at the current
    /// exposure, one per synthetic frame interval. Used by the metering
    /// demo; does not go through the event channel.
    pub fn luma_stream(
        self: Arc<Self>,
        interval: std::time::Duration,
    ) -> impl Stream<Item = f64> {
        stream! {
            loop {
                tokio::time::sleep(interval).await;
                yield self.measured_luma();
            }
        }
    }
}

impl CaptureControl for SyntheticCapture {
    fn exposure_limits(&self) -> (RangeInclusive<u32>, RangeInclusive<u64>) {
        (self.iso_range.clone(), self.time_range.clone())
    }

    fn current_exposure(&self) -> (u32, u64) {
        let state = self.state.lock().expect("synthetic state lock poisoned");
        (state.iso, state.exposure_time_ns)
    }

    fn apply_exposure(&self, config: &ExposureConfig) {
        let mut state = self.state.lock().expect("synthetic state lock poisoned");
        state.iso = config.iso;
        state.exposure_time_ns = config.exposure_time_ns;
        debug!(
            iso = config.iso,
            exposure_time_ns = config.exposure_time_ns,
            "Synthetic exposure applied"
        );
    }

    fn request_frame(&self) {
        let (timestamp_ns, metadata) = {
            let mut state = self.state.lock().expect("synthetic state lock poisoned");
            let ts = state.next_timestamp_ns;
            state.next_timestamp_ns += 33_333_333; // ~30 fps cadence
            (ts, self.metadata_for(&state))
        };

        let plane = self.make_plane(timestamp_ns);
        let (ack, ack_rx) = SourceAck::channel();

        let acked = Arc::clone(&self.acked_frames);
        tokio::spawn(async move {
            if ack_rx.await.is_ok() {
                acked.fetch_add(1, Ordering::Relaxed);
            }
        });

        let delivery = FrameDelivery {
            plane,
            descriptor: self.descriptor,
            timestamp_ns,
            rotation: SensorRotation::None,
            physical_sensor_id: None,
            ack,
        };

        self.delivered_frames.fetch_add(1, Ordering::Relaxed);

        // Metadata goes first, mirroring capture-result callbacks racing
        // the image queue on real hardware. The pump preserves this order
        // end to end.
        let _ = self.pump_tx.send(CaptureEvent::Metadata {
            timestamp_ns,
            metadata,
        });
        let _ = self.pump_tx.send(CaptureEvent::Frame(delivery));
        trace!(timestamp_ns, "Synthetic frame queued");
    }
}
