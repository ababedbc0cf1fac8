// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipelines
//!
//! Composition layer over the leaf components: burst assembly, admission
//! control, and the orchestrator tying capture events to engine dispatch.

pub mod burst;
pub mod gate;
pub mod orchestrator;

pub use burst::{AddOutcome, BurstAccumulator, BurstState};
pub use gate::{AdmissionTicket, ConcurrencyGate};
pub use orchestrator::{
    CaptureOutcome, PipelineChannels, PipelineCommand, PipelineOrchestrator,
};
