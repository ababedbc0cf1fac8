// SPDX-License-Identifier: GPL-3.0-only

//! Stride-aware frame packing
//!
//! Sensor planes arrive with a row stride that is often wider than the
//! logical row because of memory alignment. Downstream merge code wants
//! tightly packed pixels, so every frame is copied once here, on the
//! capture path, into a pooled destination buffer with the padding
//! stripped.

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::errors::PackError;
use crate::frame::{RawFrame, SensorRotation};
use tracing::{trace, warn};

/// Geometry of a delivered sensor plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneDescriptor {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per source row, including alignment padding
    pub row_stride: u32,
    /// Bytes per pixel (2 for RAW16)
    pub pixel_stride: u32,
}

impl PlaneDescriptor {
    /// Logical row length in bytes, padding excluded
    pub fn packed_row_len(&self) -> usize {
        self.width as usize * self.pixel_stride as usize
    }

    /// Total packed payload in bytes
    pub fn packed_len(&self) -> Option<usize> {
        self.packed_row_len().checked_mul(self.height as usize)
    }
}

/// Copies raw sensor planes into tightly packed pooled buffers
#[derive(Debug, Clone)]
pub struct FramePacker {
    pool: BufferPool,
}

impl FramePacker {
    /// Create a packer drawing destination buffers from `pool`
    pub fn new(pool: BufferPool) -> Self {
        Self { pool }
    }

    /// Pack a source plane into a pooled buffer with row padding removed.
    ///
    /// Fast path when the source is already tightly packed
    /// (`row_stride == width * pixel_stride`): one bulk copy, bounded by
    /// the declared payload length or the source's actual length,
    /// whichever is smaller. Slow path otherwise: row-by-row copies
    /// truncated to the logical row, stopping early (completed rows only)
    /// if a row's declared extent runs past the source — a safety bound
    /// against malformed plane descriptors.
    ///
    /// The source is only read; the caller's view of it is untouched. On
    /// allocation failure nothing is retained: the error carries the
    /// requested size and the destination never leaves the pool.
    pub fn pack(&self, src: &[u8], desc: &PlaneDescriptor) -> Result<PooledBuffer, PackError> {
        if (desc.row_stride as usize) < desc.packed_row_len() {
            return Err(PackError::InvalidPlane(format!(
                "row stride {} shorter than packed row {}",
                desc.row_stride,
                desc.packed_row_len()
            )));
        }

        let row_len = desc.packed_row_len();
        let data_len = desc
            .packed_len()
            .ok_or(PackError::ResourceExhaustion {
                requested_bytes: usize::MAX,
            })?;

        let mut dst = self.pool.acquire(data_len)?;

        if desc.row_stride as usize == row_len {
            // Already tightly packed; the source may still carry trailing
            // alignment bytes, so bound the copy both ways.
            let copy_len = data_len.min(src.len());
            dst.extend_from_slice(&src[..copy_len]);
        } else {
            let row_stride = desc.row_stride as usize;
            for y in 0..desc.height as usize {
                let row_start = y * row_stride;
                let row_end = row_start + row_len;
                if row_end > src.len() {
                    warn!(
                        row = y,
                        height = desc.height,
                        "Source plane shorter than descriptor, truncating"
                    );
                    break;
                }
                dst.extend_from_slice(&src[row_start..row_end]);
            }
        }

        trace!(
            packed_bytes = dst.len(),
            expected_bytes = data_len,
            "Plane packed"
        );
        Ok(dst)
    }

    /// Pack a plane and wrap it as a [`RawFrame`] with its capture identity
    pub fn pack_frame(
        &self,
        src: &[u8],
        desc: &PlaneDescriptor,
        timestamp_ns: i64,
        rotation: SensorRotation,
        physical_sensor_id: Option<String>,
    ) -> Result<RawFrame, PackError> {
        let buffer = self.pack(src, desc)?;
        Ok(RawFrame {
            buffer,
            width: desc.width,
            height: desc.height,
            pixel_stride: desc.pixel_stride,
            timestamp_ns,
            rotation,
            physical_sensor_id,
        })
    }
}
