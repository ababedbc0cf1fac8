// SPDX-License-Identifier: GPL-3.0-only

//! Admission control and hand-off to the processing worker
//!
//! Processing a unit pins several hundred megabytes of packed frames, so
//! the number of in-flight units is bounded by admission permits, and a
//! bounded queue carries admitted units from the capture side to the
//! single processing worker. Admission is non-blocking: when no permit is
//! free the capture request is rejected immediately instead of stalling
//! the capture path.

use crate::errors::GateError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// One in-flight unit of processing work.
///
/// Dropping the ticket releases its permit — exactly once, on every
/// completion path (success, failure, abort, panic unwind), because no
/// other release mechanism exists.
#[derive(Debug)]
pub struct AdmissionTicket {
    _permit: OwnedSemaphorePermit,
}

/// Bounded admission + FIFO hand-off between the capture side and the
/// processing worker.
///
/// Units flow through a single consumer, so processing order is exactly
/// enqueue order.
#[derive(Debug)]
pub struct ConcurrencyGate<T> {
    semaphore: Arc<Semaphore>,
    limit: usize,
    tx: mpsc::Sender<T>,
}

impl<T> ConcurrencyGate<T> {
    /// Create a gate with `limit` admission permits and a hand-off queue
    /// of `queue_capacity`. The returned receiver is the worker's end of
    /// the queue.
    pub fn new(limit: usize, queue_capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        (
            Self {
                semaphore: Arc::new(Semaphore::new(limit)),
                limit,
                tx,
            },
            rx,
        )
    }

    /// Try to admit a new unit without blocking.
    ///
    /// [`GateError::AdmissionRejected`] is the expected backpressure
    /// signal when the pipeline is saturated; the caller surfaces it and
    /// waits for a later opportunity rather than spinning.
    pub fn try_admit(&self) -> Result<AdmissionTicket, GateError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                trace!(
                    outstanding = self.limit - self.semaphore.available_permits(),
                    "Unit admitted"
                );
                Ok(AdmissionTicket { _permit: permit })
            }
            Err(_) => {
                debug!("Admission rejected, processing queue full");
                Err(GateError::AdmissionRejected)
            }
        }
    }

    /// Hand an admitted unit to the worker.
    ///
    /// Suspends cooperatively only while the queue is full; with the
    /// admission limit no larger than the queue capacity this returns
    /// immediately in practice.
    pub async fn enqueue(&self, unit: T) -> Result<(), GateError> {
        self.tx.send(unit).await.map_err(|_| GateError::Closed)
    }

    /// Permits currently free
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured admission limit
    pub fn limit(&self) -> usize {
        self.limit
    }
}
