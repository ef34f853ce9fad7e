//! Sample format and channel layout conversion
//!
//! Wraps FFmpeg's `SwrContext` to turn decoded frames into the encoder's
//! sample format and the fixed stereo output layout. The sample rate is never
//! converted: input and output rates must match, so every converted block
//! holds exactly as many samples as the frame it came from.

use crate::error::{describe, FfmpegError, Result, TranscodeError};
use crate::ffmpeg_utils::helpers::audio_plane_data;
use crate::types::StreamDescriptor;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::format::sample::Sample;

use super::SampleConvert;

/// Converted samples for one decoded frame, in the output format.
///
/// All planes live in one contiguous allocation; plane `i` starts at
/// `i * plane_len`.
pub struct ConvertedSampleBlock {
    data: Vec<u8>,
    plane_len: usize,
    planes: usize,
    samples: usize,
    format: Sample,
}

impl ConvertedSampleBlock {
    /// Allocate zeroed storage for `samples` samples in `descriptor`'s format.
    pub fn alloc(descriptor: &StreamDescriptor, samples: usize) -> Result<Self> {
        let planes = descriptor.planes();
        let plane_len = samples
            .checked_mul(descriptor.plane_sample_bytes())
            .ok_or_else(|| {
                TranscodeError::Allocation("converted sample block size overflow".into())
            })?;
        let total = plane_len.checked_mul(planes).ok_or_else(|| {
            TranscodeError::Allocation("converted sample block size overflow".into())
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(total).map_err(|e| {
            TranscodeError::Allocation(format!(
                "Could not allocate converted input samples ({} bytes): {}",
                total, e
            ))
        })?;
        data.resize(total, 0);

        Ok(Self {
            data,
            plane_len,
            planes,
            samples,
            format: descriptor.sample_format,
        })
    }

    /// Samples per channel in this block.
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn planes(&self) -> usize {
        self.planes
    }

    pub fn format(&self) -> Sample {
        self.format
    }

    pub fn plane(&self, index: usize) -> &[u8] {
        &self.data[index * self.plane_len..(index + 1) * self.plane_len]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.data[index * self.plane_len..(index + 1) * self.plane_len]
    }
}

/// Reject any configuration that would require sample-rate conversion.
pub fn ensure_rate_match(input: &StreamDescriptor, output: &StreamDescriptor) -> Result<()> {
    if input.sample_rate != output.sample_rate {
        return Err(TranscodeError::RateMismatch {
            input: input.sample_rate,
            output: output.sample_rate,
        });
    }
    Ok(())
}

/// Format/layout converter backed by FFmpeg's `SwrContext`
pub struct SampleResampler {
    context: resampling::Context,
    input: StreamDescriptor,
    output: StreamDescriptor,
}

impl SampleResampler {
    /// Create a converter from `input` to `output`.
    ///
    /// Fails with `RateMismatch` before touching FFmpeg if the two rates
    /// differ.
    pub fn new(input: &StreamDescriptor, output: &StreamDescriptor) -> Result<Self> {
        ensure_rate_match(input, output)?;

        let context = resampling::Context::get(
            input.sample_format,
            input.channel_layout,
            input.sample_rate,
            output.sample_format,
            output.channel_layout,
            output.sample_rate,
        )
        .map_err(|e| FfmpegError::ResamplerCreate(describe(e)))?;

        tracing::debug!(
            from_format = ?input.sample_format,
            from_channels = input.channels,
            to_format = ?output.sample_format,
            to_channels = output.channels,
            rate = output.sample_rate,
            "resampler initialised"
        );

        Ok(Self {
            context,
            input: *input,
            output: *output,
        })
    }
}

impl SampleConvert for SampleResampler {
    fn convert(&mut self, mut frame: ffmpeg::util::frame::Audio) -> Result<ConvertedSampleBlock> {
        let samples = frame.samples();

        // Demuxers do not always tag frames with a layout; SwrContext refuses
        // frames whose layout differs from the one it was configured with.
        if frame.channel_layout() != self.input.channel_layout {
            frame.set_channel_layout(self.input.channel_layout);
        }

        // Output frame must be empty: `run` allocates it from the context's
        // output definition.
        let mut out = ffmpeg::util::frame::Audio::empty();
        self.context
            .run(&frame, &mut out)
            .map_err(|e| FfmpegError::Convert(describe(e)))?;

        if out.samples() != samples {
            return Err(FfmpegError::Convert(format!(
                "resampler produced {} samples for a {}-sample frame",
                out.samples(),
                samples
            ))
            .into());
        }

        let mut block = ConvertedSampleBlock::alloc(&self.output, samples)?;
        let plane_len = samples * self.output.plane_sample_bytes();
        for index in 0..block.planes() {
            let src = audio_plane_data(&out, index);
            if src.len() < plane_len {
                return Err(FfmpegError::Convert(format!(
                    "converted plane {} holds {} bytes, expected {}",
                    index,
                    src.len(),
                    plane_len
                ))
                .into());
            }
            block.plane_mut(index).copy_from_slice(&src[..plane_len]);
        }

        tracing::trace!(samples, "frame converted");
        Ok(block)
    }
}
