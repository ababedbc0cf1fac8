// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture pipeline

use std::fmt;

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Main pipeline error type
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Frame packing / buffer allocation errors
    Pack(PackError),
    /// Metadata correlation errors
    Correlation(CorrelationError),
    /// Admission / hand-off errors
    Gate(GateError),
    /// External color-engine errors
    Engine(EngineError),
    /// Burst assembly errors
    Burst(BurstError),
    /// Asset persistence errors
    Storage(String),
    /// Capture collaborator errors
    Capture(String),
}

/// Frame packing errors
#[derive(Debug, Clone, PartialEq)]
pub enum PackError {
    /// Destination buffer allocation failed (out of memory).
    /// Recoverable: the caller aborts the frame or burst and may fall
    /// back to a lower-quality single-frame path.
    ResourceExhaustion {
        /// Number of bytes the packer asked for
        requested_bytes: usize,
    },
    /// Source plane descriptor does not cover a single row
    InvalidPlane(String),
}

/// Metadata correlation errors
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationError {
    /// No metadata record matched within the wait budget.
    /// The unit carrying this timestamp is not dispatched to the engine.
    Timeout {
        /// Sensor timestamp the lookup was keyed on
        timestamp_ns: i64,
    },
}

/// Admission and hand-off errors
#[derive(Debug, Clone, PartialEq)]
pub enum GateError {
    /// No admission permit is free. This is expected backpressure, not a
    /// defect: the capture request is rejected without blocking and the
    /// operator retries once a unit completes.
    AdmissionRejected,
    /// The worker side of the hand-off queue is gone
    Closed,
}

/// External color-engine errors
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Engine returned a negative status code
    Failure {
        /// Raw status code reported by the engine
        status: i32,
    },
}

/// Burst assembly errors
#[derive(Debug, Clone, PartialEq)]
pub enum BurstError {
    /// A frame inside the burst failed, so the whole burst was discarded
    /// and every collected buffer was released
    PartialAbort {
        /// Frames that had been collected when the abort hit
        collected: usize,
    },
    /// A frame arrived while no burst was collecting
    NotCollecting,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Pack(e) => write!(f, "Packing error: {}", e),
            PipelineError::Correlation(e) => write!(f, "Correlation error: {}", e),
            PipelineError::Gate(e) => write!(f, "Gate error: {}", e),
            PipelineError::Engine(e) => write!(f, "Engine error: {}", e),
            PipelineError::Burst(e) => write!(f, "Burst error: {}", e),
            PipelineError::Storage(msg) => write!(f, "Storage error: {}", msg),
            PipelineError::Capture(msg) => write!(f, "Capture error: {}", msg),
        }
    }
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::ResourceExhaustion { requested_bytes } => {
                write!(f, "Allocation of {} bytes failed", requested_bytes)
            }
            PackError::InvalidPlane(msg) => write!(f, "Invalid plane: {}", msg),
        }
    }
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationError::Timeout { timestamp_ns } => {
                write!(
                    f,
                    "No metadata for timestamp {} within wait budget",
                    timestamp_ns
                )
            }
        }
    }
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::AdmissionRejected => write!(f, "Processing queue full"),
            GateError::Closed => write!(f, "Hand-off queue closed"),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Failure { status } => {
                write!(f, "Engine returned error code {}", status)
            }
        }
    }
}

impl fmt::Display for BurstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BurstError::PartialAbort { collected } => {
                write!(f, "Burst aborted after {} collected frames", collected)
            }
            BurstError::NotCollecting => write!(f, "No burst is collecting"),
        }
    }
}

impl std::error::Error for PipelineError {}
impl std::error::Error for PackError {}
impl std::error::Error for CorrelationError {}
impl std::error::Error for GateError {}
impl std::error::Error for EngineError {}
impl std::error::Error for BurstError {}

// Conversions from sub-errors to PipelineError
impl From<PackError> for PipelineError {
    fn from(err: PackError) -> Self {
        PipelineError::Pack(err)
    }
}

impl From<CorrelationError> for PipelineError {
    fn from(err: CorrelationError) -> Self {
        PipelineError::Correlation(err)
    }
}

impl From<GateError> for PipelineError {
    fn from(err: GateError) -> Self {
        PipelineError::Gate(err)
    }
}

impl From<EngineError> for PipelineError {
    fn from(err: EngineError) -> Self {
        PipelineError::Engine(err)
    }
}

impl From<BurstError> for PipelineError {
    fn from(err: BurstError) -> Self {
        PipelineError::Burst(err)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}
