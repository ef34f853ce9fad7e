//! Sample FIFO bridging decoder and encoder frame sizes
//!
//! Holds converted samples in the output format until the encoder has a full
//! frame's worth. One `BytesMut` per data plane; reads split the front of
//! each plane off without copying.
//!
//! Growth is bounded by a sample limit checked before reserving, since
//! `BytesMut` aborts the process rather than reporting a failed allocation.

use bytes::{Bytes, BytesMut};
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{Result, TranscodeError};
use crate::types::StreamDescriptor;

use super::resampler::ConvertedSampleBlock;

/// Largest number of samples (per channel) a FIFO will hold. FFmpeg's own
/// audio FIFO counts samples in an `int`.
pub const MAX_FIFO_SAMPLES: usize = i32::MAX as usize;

/// Single-producer/single-consumer queue of samples in one fixed format.
pub struct SampleFifo {
    format: Sample,
    channels: u16,
    plane_sample_bytes: usize,
    planes: Vec<BytesMut>,
    size: usize,
    max_samples: usize,
}

impl SampleFifo {
    /// Create an empty FIFO for samples described by `descriptor`, with room
    /// for `initial_samples` before the first reallocation.
    pub fn new(descriptor: &StreamDescriptor, initial_samples: usize) -> Result<Self> {
        Self::with_limit(descriptor, initial_samples, MAX_FIFO_SAMPLES)
    }

    /// Like [`SampleFifo::new`], refusing to grow past `max_samples`.
    pub fn with_limit(
        descriptor: &StreamDescriptor,
        initial_samples: usize,
        max_samples: usize,
    ) -> Result<Self> {
        let plane_sample_bytes = descriptor.plane_sample_bytes();
        if plane_sample_bytes == 0 {
            return Err(TranscodeError::Allocation(format!(
                "Could not allocate FIFO for sample format {:?}",
                descriptor.sample_format
            )));
        }
        let initial = initial_samples
            .min(max_samples)
            .checked_mul(plane_sample_bytes)
            .ok_or_else(|| TranscodeError::Allocation("FIFO capacity overflow".into()))?;

        let planes = (0..descriptor.planes())
            .map(|_| BytesMut::with_capacity(initial))
            .collect();

        Ok(Self {
            format: descriptor.sample_format,
            channels: descriptor.channels,
            plane_sample_bytes,
            planes,
            size: 0,
            max_samples,
        })
    }

    /// Number of samples (per channel) currently queued.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Samples (per channel) the FIFO can hold before it grows again.
    pub fn capacity(&self) -> usize {
        self.planes
            .iter()
            .map(|p| p.capacity() / self.plane_sample_bytes)
            .min()
            .unwrap_or(0)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Append the first `count` samples of `block`.
    ///
    /// Capacity grows to at least `size() + count` before anything is copied.
    /// Fails with `ShortWrite` if the block holds fewer than `count` samples,
    /// and with `Allocation` if the FIFO would exceed its sample limit.
    pub fn write(&mut self, block: &ConvertedSampleBlock, count: usize) -> Result<()> {
        if block.format() != self.format || block.planes() != self.planes.len() {
            return Err(TranscodeError::LayoutMismatch(format!(
                "FIFO holds {:?} x{} planes, block is {:?} x{} planes",
                self.format,
                self.planes.len(),
                block.format(),
                block.planes()
            )));
        }
        if block.samples() < count {
            return Err(TranscodeError::ShortWrite {
                requested: count,
                written: block.samples(),
            });
        }

        let bytes = count
            .checked_mul(self.plane_sample_bytes)
            .ok_or_else(|| TranscodeError::Allocation("FIFO write size overflow".into()))?;
        let new_size = self
            .size
            .checked_add(count)
            .filter(|n| *n <= self.max_samples)
            .ok_or_else(|| {
                TranscodeError::Allocation(format!(
                    "Could not reallocate FIFO: {} + {} samples exceeds limit of {}",
                    self.size, count, self.max_samples
                ))
            })?;

        for (index, plane) in self.planes.iter_mut().enumerate() {
            plane.reserve(bytes);
            plane.extend_from_slice(&block.plane(index)[..bytes]);
        }
        self.size = new_size;

        tracing::trace!(written = count, size = self.size, "fifo write");
        Ok(())
    }

    /// Remove and return the oldest `count` samples, one buffer per plane.
    ///
    /// Callers must check `size()` first; asking for more than is queued is
    /// reported as `ShortRead` and leaves the FIFO untouched.
    pub fn read(&mut self, count: usize) -> Result<Vec<Bytes>> {
        if count > self.size {
            return Err(TranscodeError::ShortRead {
                requested: count,
                available: self.size,
            });
        }

        let bytes = count * self.plane_sample_bytes;
        let out = self
            .planes
            .iter_mut()
            .map(|plane| plane.split_to(bytes).freeze())
            .collect();
        self.size -= count;

        tracing::trace!(read = count, size = self.size, "fifo read");
        Ok(out)
    }
}
