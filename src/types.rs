//! Shared data types for the transcoding pipeline

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;
use serde::Serialize;

/// Number of channels written to the output, regardless of the input layout.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Description of one opened audio stream (input or output).
///
/// Built once when a session opens and never modified afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDescriptor {
    pub codec_id: ffmpeg::codec::Id,
    pub sample_format: Sample,
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_layout: ChannelLayout,
}

impl StreamDescriptor {
    /// Number of data planes a frame in this format carries.
    pub fn planes(&self) -> usize {
        if self.sample_format.is_planar() {
            self.channels as usize
        } else {
            1
        }
    }

    /// Bytes occupied by one sample in one plane.
    pub fn plane_sample_bytes(&self) -> usize {
        if self.sample_format.is_planar() {
            self.sample_format.bytes()
        } else {
            self.sample_format.bytes() * self.channels as usize
        }
    }

    /// Printable form for logs and reports.
    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            codec: self.codec_id.name().to_string(),
            sample_format: format!("{:?}", self.sample_format),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Channel layout for `channels`, falling back to FFmpeg's default mapping
/// when the stream does not declare one.
pub fn layout_or_default(layout: ChannelLayout, channels: u16) -> ChannelLayout {
    if layout.bits() == 0 || layout.channels() != channels as i32 {
        ChannelLayout::default(channels as i32)
    } else {
        layout
    }
}

/// Result of one `decode_next` call.
pub enum DecodeOutcome {
    /// The decoder needs more input before it can produce a frame.
    NoData,
    /// One decoded frame in the decoder's native format.
    Frame(ffmpeg::util::frame::Audio),
    /// Input exhausted and every delayed frame has been returned.
    EndOfStream,
}

/// Result of one `encode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// The encoder produced nothing (needs more input, or fully drained).
    NoData,
    /// At least one packet was produced and muxed.
    Data { packets: usize },
}

impl EncodeOutcome {
    pub fn data_present(&self) -> bool {
        matches!(self, EncodeOutcome::Data { .. })
    }
}

/// Serializable view of a [`StreamDescriptor`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StreamSummary {
    pub codec: String,
    pub sample_format: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Counters collected over one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscodeReport {
    pub input: Option<StreamSummary>,
    pub output: Option<StreamSummary>,
    /// Samples per channel returned by the decoder.
    pub decoded_samples: u64,
    /// Samples per channel written into the FIFO.
    pub fifo_samples_written: u64,
    /// Samples per channel handed to the encoder; equals the final pts.
    pub encoded_samples: u64,
    /// Frames handed to the encoder.
    pub frames_encoded: u64,
    /// Frames handed to the encoder that were shorter than the encoder frame size.
    pub partial_frames: u64,
    /// Packets muxed into the output container.
    pub packets_written: u64,
    /// `encode(None)` calls made while flushing.
    pub flush_calls: u64,
    pub elapsed_ms: u64,
}
