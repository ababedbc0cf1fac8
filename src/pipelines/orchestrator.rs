// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline orchestration
//!
//! Ties the pieces together: capture events come in over a bounded
//! channel, frames are packed on arrival (the capture path stays fast —
//! one copy, no waiting), burst frames accumulate into atomic sets,
//! admitted units flow through the concurrency gate to a single worker,
//! and the worker correlates metadata, dispatches to the external color
//! engine, persists the outputs and reports a typed outcome upward.
//!
//! Failure discipline: every completion path releases its admission
//! permit exactly once (the ticket rides inside the work unit and drops
//! with it), every discarded frame returns its buffer to the pool (frame
//! drop), and every delivered source plane is acked exactly once.

use crate::buffer_pool::BufferPool;
use crate::capture::{CaptureControl, CaptureEvent, FrameDelivery};
use crate::config::CaptureConfig;
use crate::constants::{ENGINE_DEBUG_STATS_LEN, METADATA_CACHE_CAPACITY};
use crate::correlator::MetadataCorrelator;
use crate::engine::{
    BurstDispatch, ColorEngine, EngineDebugStats, EngineStatus, OutputPaths, SingleDispatch,
};
use crate::errors::{EngineError, PipelineError};
use crate::exposure::{ExposureController, calculate_exposure};
use crate::frame::{BurstParams, BurstSet, RawFrame};
use crate::packer::FramePacker;
use crate::pipelines::burst::{AddOutcome, BurstAccumulator};
use crate::pipelines::gate::{AdmissionTicket, ConcurrencyGate};
use crate::storage::{AssetStore, capture_base_name};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Commands driving a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Capture and process one frame
    CaptureSingle,
    /// Plan exposure, capture a burst and process it as one unit
    CaptureBurst,
    /// Session teardown: release burst state and smoothing state.
    /// Units already admitted finish normally and release their permits.
    Reset,
}

/// Typed completion report for one capture request
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Unit dispatched and its outputs persisted
    Completed {
        /// Base name the outputs were persisted under
        base_name: String,
        /// Engine status; the CPU fallback is a distinguishable success
        status: EngineStatus,
        /// Persisted output files
        persisted: Vec<PathBuf>,
        /// True when the unit was a burst
        burst: bool,
        /// True when a failed burst was recovered as a single frame
        fallback_used: bool,
    },
    /// No admission permit was free; expected backpressure, retry later
    Rejected,
    /// Unit failed
    Failed {
        /// What went wrong
        error: PipelineError,
        /// Sensor timestamp the failure is attributable to, if any
        timestamp_ns: Option<i64>,
    },
}

/// Channel ends handed back at construction
pub struct PipelineChannels {
    /// Session commands flow in here
    pub commands: mpsc::Sender<PipelineCommand>,
    /// Completion reports flow out here
    pub outcomes: mpsc::UnboundedReceiver<CaptureOutcome>,
}

/// One admitted unit of processing work
struct WorkUnit {
    ticket: AdmissionTicket,
    payload: WorkPayload,
}

enum WorkPayload {
    Single { frame: RawFrame, fallback: bool },
    Burst(BurstSet),
}

/// Session-level capture mode
enum SessionMode {
    /// No burst in flight
    Preview,
    /// Burst frames being collected
    BurstActive {
        ticket: Option<AdmissionTicket>,
        digital_gain: f32,
    },
}

/// Composes packing, correlation, burst assembly, admission and dispatch
pub struct PipelineOrchestrator {
    config: CaptureConfig,
    packer: FramePacker,
    correlator: MetadataCorrelator,
    accumulator: BurstAccumulator,
    exposure: ExposureController,
    gate: ConcurrencyGate<WorkUnit>,
    control: Arc<dyn CaptureControl>,
    events: mpsc::Receiver<CaptureEvent>,
    commands: mpsc::Receiver<PipelineCommand>,
    outcomes: mpsc::UnboundedSender<CaptureOutcome>,
    mode: SessionMode,
    pending_singles: VecDeque<AdmissionTicket>,
    worker: JoinHandle<()>,
    session_id: Uuid,
}

impl PipelineOrchestrator {
    /// Wire up an orchestrator over an existing capture event channel.
    /// The caller creates the bounded event channel (capacity
    /// [`crate::capture::CAPTURE_EVENT_QUEUE_CAPACITY`] is the
    /// conventional size) and gives the sender to the capture
    /// collaborator. Must be called inside a tokio runtime (spawns the
    /// worker).
    pub fn new(
        config: CaptureConfig,
        pool: BufferPool,
        engine: Arc<dyn ColorEngine>,
        store: Arc<dyn AssetStore>,
        control: Arc<dyn CaptureControl>,
        events_rx: mpsc::Receiver<CaptureEvent>,
    ) -> (Self, PipelineChannels) {
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let (gate, work_rx) =
            ConcurrencyGate::new(config.concurrency_limit.max(1), config.queue_capacity.max(1));

        let correlator = MetadataCorrelator::new(METADATA_CACHE_CAPACITY);
        let worker = Worker {
            correlator: correlator.clone(),
            engine,
            store,
            config: config.clone(),
            outcomes: outcomes_tx.clone(),
        };
        let worker = tokio::spawn(worker.run(work_rx));

        let orchestrator = Self {
            accumulator: BurstAccumulator::new(config.burst_frame_count.max(1)),
            exposure: ExposureController::new(config.smoothing_factor),
            packer: FramePacker::new(pool),
            correlator,
            gate,
            control,
            events: events_rx,
            commands: commands_rx,
            outcomes: outcomes_tx,
            mode: SessionMode::Preview,
            pending_singles: VecDeque::new(),
            worker,
            session_id: Uuid::new_v4(),
            config,
        };

        (
            orchestrator,
            PipelineChannels {
                commands: commands_tx,
                outcomes: outcomes_rx,
            },
        )
    }

    /// The session's exposure controller, for preview metering
    pub fn exposure_controller(&mut self) -> &mut ExposureController {
        &mut self.exposure
    }

    /// Drive the session until both input channels close
    pub async fn run(mut self) {
        info!(session = %self.session_id, "Capture pipeline running");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => break,
                },
            }
        }

        // Teardown: release burst state and close the hand-off so the
        // worker drains and exits. Admitted units still release their
        // permits through their tickets.
        let Self {
            mut accumulator,
            mut pending_singles,
            mode,
            gate,
            worker,
            session_id,
            ..
        } = self;
        accumulator.reset();
        pending_singles.clear();
        drop(mode);
        drop(gate);
        let _ = worker.await;
        info!(session = %session_id, "Capture pipeline stopped");
    }

    fn on_command(&mut self, cmd: PipelineCommand) {
        match cmd {
            PipelineCommand::CaptureSingle => self.trigger_single(),
            PipelineCommand::CaptureBurst => self.trigger_burst(),
            PipelineCommand::Reset => self.reset_session(),
        }
    }

    fn trigger_single(&mut self) {
        match self.gate.try_admit() {
            Ok(ticket) => {
                self.pending_singles.push_back(ticket);
                self.control.request_frame();
            }
            Err(_) => {
                debug!("Single capture rejected, queue full");
                let _ = self.outcomes.send(CaptureOutcome::Rejected);
            }
        }
    }

    fn trigger_burst(&mut self) {
        if matches!(self.mode, SessionMode::BurstActive { .. }) {
            debug!("Burst already active, ignoring trigger");
            return;
        }
        let ticket = match self.gate.try_admit() {
            Ok(ticket) => ticket,
            Err(_) => {
                debug!("Burst capture rejected, queue full");
                let _ = self.outcomes.send(CaptureOutcome::Rejected);
                return;
            }
        };

        // Plan the burst exposure from the camera's current state and
        // pin the sensor to it before requesting frames
        let (current_iso, current_time_ns) = self.control.current_exposure();
        let (iso_range, time_range) = self.control.exposure_limits();
        let plan = calculate_exposure(current_iso, current_time_ns, &iso_range, &time_range);
        info!(
            target_iso = plan.iso,
            target_time_ns = plan.exposure_time_ns,
            digital_gain = plan.digital_gain,
            "Burst exposure planned"
        );
        self.control.apply_exposure(&plan);

        self.accumulator.reset();
        self.mode = SessionMode::BurstActive {
            ticket: Some(ticket),
            digital_gain: plan.digital_gain,
        };

        let frame_count = self.accumulator.frame_count();
        info!(frame_count, "Starting burst capture");
        for _ in 0..frame_count {
            self.control.request_frame();
        }
    }

    fn reset_session(&mut self) {
        debug!("Session reset");
        self.accumulator.reset();
        self.pending_singles.clear();
        self.mode = SessionMode::Preview;
        self.exposure.reset();
    }

    async fn on_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Metadata {
                timestamp_ns,
                metadata,
            } => self.correlator.record(timestamp_ns, metadata),
            CaptureEvent::Frame(delivery) => self.on_frame(delivery).await,
            CaptureEvent::LumaMeasured { luma } => self.on_luma(luma),
        }
    }

    /// Fold a preview luma sample into the smoothed exposure and push the
    /// result back to the sensor. Skipped mid-burst: the burst runs on
    /// its pinned exposure plan.
    fn on_luma(&mut self, luma: f64) {
        if matches!(self.mode, SessionMode::BurstActive { .. }) {
            return;
        }
        let (current_iso, current_time_ns) = self.control.current_exposure();
        let (iso_range, time_range) = self.control.exposure_limits();
        let smoothed = self
            .exposure
            .update(luma, current_iso, current_time_ns, &iso_range, &time_range);
        self.control.apply_exposure(&smoothed);
    }

    async fn on_frame(&mut self, delivery: FrameDelivery) {
        let expecting = matches!(self.mode, SessionMode::BurstActive { .. })
            || !self.pending_singles.is_empty();
        if !expecting {
            debug!(
                timestamp_ns = delivery.timestamp_ns,
                "Unsolicited frame, dropping"
            );
            // The ack fires when the delivery drops
            return;
        }

        let FrameDelivery {
            plane,
            descriptor,
            timestamp_ns,
            rotation,
            physical_sensor_id,
            ack,
        } = delivery;

        let packed = self.packer.pack_frame(
            &plane,
            &descriptor,
            timestamp_ns,
            rotation,
            physical_sensor_id,
        );
        // Done with the source the moment the copy is over, before any
        // correlation or dispatch work
        drop(plane);
        ack.fire();

        if matches!(self.mode, SessionMode::BurstActive { .. }) {
            self.on_burst_frame(packed, timestamp_ns).await;
        } else {
            self.on_single_frame(packed, timestamp_ns).await;
        }
    }

    async fn on_single_frame(
        &mut self,
        packed: Result<RawFrame, crate::errors::PackError>,
        timestamp_ns: i64,
    ) {
        let Some(ticket) = self.pending_singles.pop_front() else {
            return;
        };
        match packed {
            Ok(frame) => {
                self.submit(WorkUnit {
                    ticket,
                    payload: WorkPayload::Single {
                        frame,
                        fallback: false,
                    },
                })
                .await;
            }
            Err(err) => {
                // Dropping the ticket releases the permit
                warn!(error = %err, "Single frame packing failed");
                let _ = self.outcomes.send(CaptureOutcome::Failed {
                    error: err.into(),
                    timestamp_ns: Some(timestamp_ns),
                });
            }
        }
    }

    async fn on_burst_frame(
        &mut self,
        packed: Result<RawFrame, crate::errors::PackError>,
        timestamp_ns: i64,
    ) {
        match packed {
            Ok(frame) => match self.accumulator.add_frame(frame) {
                AddOutcome::Collected { remaining } => {
                    debug!(remaining, "Burst frame packed");
                }
                AddOutcome::Complete(frames) => {
                    let (ticket, digital_gain) = self.finish_burst_mode();
                    let Some(ticket) = ticket else { return };
                    let set = BurstSet {
                        frames,
                        params: BurstParams {
                            digital_gain,
                            target_log_index: self.config.target_log_index,
                            lut_path: self.config.lut_path.clone(),
                        },
                    };
                    self.submit(WorkUnit {
                        ticket,
                        payload: WorkPayload::Burst(set),
                    })
                    .await;
                }
                AddOutcome::Rejected(frame) => {
                    warn!(
                        timestamp_ns = frame.timestamp_ns,
                        "Burst rejected frame, releasing"
                    );
                }
            },
            Err(err) => {
                // One bad frame discards the whole burst. Keep the first
                // good frame for the configured single-shot fallback, let
                // the rest release, then hand the permit to the fallback
                // unit or drop it.
                warn!(error = %err, "Burst frame packing failed, aborting burst");
                let fallback_frame = if self.config.burst_fallback {
                    self.accumulator.take_first()
                } else {
                    None
                };
                let burst_err = self.accumulator.abort();
                let (ticket, _) = self.finish_burst_mode();
                let Some(ticket) = ticket else { return };

                if let Some(frame) = fallback_frame {
                    info!("Burst failed, falling back to first captured frame");
                    self.submit(WorkUnit {
                        ticket,
                        payload: WorkPayload::Single {
                            frame,
                            fallback: true,
                        },
                    })
                    .await;
                } else {
                    drop(ticket);
                    let _ = self.outcomes.send(CaptureOutcome::Failed {
                        error: burst_err.into(),
                        timestamp_ns: Some(timestamp_ns),
                    });
                }
            }
        }
    }

    /// Leave burst mode, returning the admission ticket and planned gain
    fn finish_burst_mode(&mut self) -> (Option<AdmissionTicket>, f32) {
        match std::mem::replace(&mut self.mode, SessionMode::Preview) {
            SessionMode::BurstActive {
                ticket,
                digital_gain,
            } => (ticket, digital_gain),
            SessionMode::Preview => (None, 1.0),
        }
    }

    async fn submit(&mut self, unit: WorkUnit) {
        if self.gate.enqueue(unit).await.is_err() {
            warn!("Hand-off queue closed, dropping unit");
            let _ = self.outcomes.send(CaptureOutcome::Failed {
                error: crate::errors::GateError::Closed.into(),
                timestamp_ns: None,
            });
        }
    }
}

/// The single processing worker draining the hand-off queue
struct Worker {
    correlator: MetadataCorrelator,
    engine: Arc<dyn ColorEngine>,
    store: Arc<dyn AssetStore>,
    config: CaptureConfig,
    outcomes: mpsc::UnboundedSender<CaptureOutcome>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<WorkUnit>) {
        while let Some(unit) = rx.recv().await {
            let WorkUnit { ticket, payload } = unit;
            let outcome = match payload {
                WorkPayload::Single { frame, fallback } => {
                    self.process_single(frame, fallback).await
                }
                WorkPayload::Burst(set) => self.process_burst(set).await,
            };
            // The unit's one permit release, on every path, before the
            // outcome crosses the admission boundary
            drop(ticket);
            let _ = self.outcomes.send(outcome);
        }
        debug!("Processing worker drained");
    }

    /// Scratch paths the engine writes into before persistence
    fn scratch_outputs(&self, base_name: &str, burst: bool) -> OutputPaths {
        let scratch = std::env::temp_dir();
        OutputPaths {
            tiff: self
                .config
                .save_tiff
                .then(|| scratch.join(format!("{}.tiff", base_name))),
            jpg: self
                .config
                .save_jpg
                .then(|| scratch.join(format!("{}.jpg", base_name))),
            dng: burst.then(|| scratch.join(format!("{}_linear.dng", base_name))),
        }
    }

    async fn process_single(&self, frame: RawFrame, fallback: bool) -> CaptureOutcome {
        let timestamp_ns = frame.timestamp_ns;
        let metadata = match self
            .correlator
            .wait_for_match(timestamp_ns, &self.config.metadata_wait)
            .await
        {
            Ok(metadata) => metadata,
            Err(err) => {
                return CaptureOutcome::Failed {
                    error: err.into(),
                    timestamp_ns: Some(timestamp_ns),
                };
            }
        };

        let base_name = capture_base_name(false);
        let outputs = self.scratch_outputs(&base_name, false);
        let dispatch = SingleDispatch {
            pixels: frame.buffer.as_slice(),
            width: frame.width,
            height: frame.height,
            packed_stride: frame.packed_stride(),
            rotation: frame.rotation,
            metadata: &metadata,
            target_log_index: self.config.target_log_index,
            lut_path: self.config.lut_path.as_deref(),
            outputs: &outputs,
            use_gpu: self.config.use_gpu,
        };

        let status = self.engine.process_single(&dispatch);
        drop(dispatch);
        // Final consumption: the frame's buffer returns to the pool here
        drop(frame);

        match status {
            EngineStatus::Failure(code) => CaptureOutcome::Failed {
                error: EngineError::Failure { status: code }.into(),
                timestamp_ns: Some(timestamp_ns),
            },
            status => {
                if status == EngineStatus::SuccessCpuFallback {
                    warn!("GPU processing failed, CPU fallback used");
                }
                match self.store.persist(&base_name, &outputs) {
                    Ok(persisted) => CaptureOutcome::Completed {
                        base_name,
                        status,
                        persisted,
                        burst: false,
                        fallback_used: fallback,
                    },
                    Err(error) => CaptureOutcome::Failed {
                        error,
                        timestamp_ns: Some(timestamp_ns),
                    },
                }
            }
        }
    }

    async fn process_burst(&self, set: BurstSet) -> CaptureOutcome {
        let timestamp_ns = set.reference_timestamp_ns();
        let metadata = match self
            .correlator
            .wait_for_match(timestamp_ns, &self.config.metadata_wait)
            .await
        {
            Ok(metadata) => metadata,
            Err(err) => {
                // Not dispatched; dropping the set releases every buffer
                return CaptureOutcome::Failed {
                    error: err.into(),
                    timestamp_ns: Some(timestamp_ns),
                };
            }
        };

        let base_name = capture_base_name(true);
        let outputs = self.scratch_outputs(&base_name, true);
        let mut debug_stats: EngineDebugStats = [0; ENGINE_DEBUG_STATS_LEN];

        let status = {
            let reference = &set.frames[0];
            let dispatch = BurstDispatch {
                frames: set.frames.iter().map(|f| f.buffer.as_slice()).collect(),
                width: reference.width,
                height: reference.height,
                packed_stride: reference.packed_stride(),
                rotation: reference.rotation,
                metadata: &metadata,
                digital_gain: set.params.digital_gain,
                capture_time_ms: chrono::Utc::now().timestamp_millis(),
                target_log_index: set.params.target_log_index,
                lut_path: set.params.lut_path.as_deref(),
                outputs: &outputs,
                use_gpu: self.config.use_gpu,
            };
            self.engine.process_burst(&dispatch, &mut debug_stats)
        };

        match status {
            EngineStatus::Failure(code) => {
                warn!(code, "Burst processing failed");
                if self.config.burst_fallback {
                    let mut frames = set.frames;
                    let first = frames.remove(0);
                    // The rest of the burst releases here
                    drop(frames);
                    info!("Falling back to single-frame processing");
                    return self.process_single(first, true).await;
                }
                CaptureOutcome::Failed {
                    error: EngineError::Failure { status: code }.into(),
                    timestamp_ns: Some(timestamp_ns),
                }
            }
            status => {
                info!(
                    total_ms = debug_stats[0],
                    align_ms = debug_stats[7],
                    merge_ms = debug_stats[8],
                    demosaic_ms = debug_stats[9],
                    denoise_ms = debug_stats[10],
                    tone_ms = debug_stats[11],
                    "Burst engine timings"
                );
                // Final consumption for the whole set
                drop(set);
                match self.store.persist(&base_name, &outputs) {
                    Ok(persisted) => CaptureOutcome::Completed {
                        base_name,
                        status,
                        persisted,
                        burst: true,
                        fallback_used: false,
                    },
                    Err(error) => CaptureOutcome::Failed {
                        error,
                        timestamp_ns: Some(timestamp_ns),
                    },
                }
            }
        }
    }
}
