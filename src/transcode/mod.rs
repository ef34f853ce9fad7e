//! Audio transcoding module
//!
//! - [`decoder`]: input file + decoder for its single audio stream
//! - [`resampler`]: sample format / channel layout conversion (no rate change)
//! - [`fifo`]: sample queue bridging decoder and encoder frame sizes
//! - [`encoder`]: output container + AAC encoder
//! - [`pipeline`]: the driver tying them together
//!
//! The driver only sees the sessions through the traits below, so it can be
//! exercised without real media files.

pub mod decoder;
pub mod encoder;
pub mod fifo;
pub mod pipeline;
pub mod resampler;

use std::path::Path;

use ffmpeg_next as ffmpeg;

use crate::config::TranscodeConfig;
use crate::error::Result;
use crate::types::{DecodeOutcome, EncodeOutcome, StreamDescriptor};

use self::decoder::DecoderSession;
use self::encoder::EncoderSession;
use self::fifo::SampleFifo;
use self::pipeline::PipelineState;
use self::resampler::{ConvertedSampleBlock, SampleResampler};

/// Source of decoded audio frames.
pub trait AudioDecode {
    fn descriptor(&self) -> &StreamDescriptor;

    /// Produce the next frame. Keep calling until `EndOfStream`; the decoder
    /// may still hold delayed frames after the input is exhausted.
    fn decode_next(&mut self) -> Result<DecodeOutcome>;
}

/// Converts one decoded frame into the output sample format and layout.
pub trait SampleConvert {
    fn convert(&mut self, frame: ffmpeg::util::frame::Audio) -> Result<ConvertedSampleBlock>;
}

/// Sink that encodes frames and muxes the resulting packets.
pub trait AudioEncode {
    fn descriptor(&self) -> &StreamDescriptor;

    /// Samples per channel the encoder expects in every frame but the last.
    fn frame_size(&self) -> usize;

    fn write_header(&mut self) -> Result<()>;

    /// Encode `frame`, or flush the encoder when `frame` is `None`.
    ///
    /// A frame is stamped with `state.pts` and `state.pts` advanced by its
    /// sample count before it reaches the encoder.
    fn encode(
        &mut self,
        frame: Option<ffmpeg::util::frame::Audio>,
        state: &mut PipelineState,
    ) -> Result<EncodeOutcome>;

    fn write_trailer(&mut self) -> Result<()>;
}

/// Acquires the pipeline's resources, in the order the driver calls these.
pub trait TranscodeBackend {
    type Decoder: AudioDecode;
    type Encoder: AudioEncode;
    type Resampler: SampleConvert;

    fn open_input(&mut self, path: &Path) -> Result<Self::Decoder>;

    fn open_output(&mut self, path: &Path, input: &StreamDescriptor) -> Result<Self::Encoder>;

    fn init_resampler(
        &mut self,
        input: &StreamDescriptor,
        output: &StreamDescriptor,
    ) -> Result<Self::Resampler>;

    fn init_fifo(&mut self, output: &StreamDescriptor) -> Result<SampleFifo> {
        SampleFifo::new(output, 1)
    }
}

/// Backend built on the FFmpeg libraries.
pub struct FfmpegBackend {
    config: TranscodeConfig,
}

impl FfmpegBackend {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }
}

impl TranscodeBackend for FfmpegBackend {
    type Decoder = DecoderSession;
    type Encoder = EncoderSession;
    type Resampler = SampleResampler;

    fn open_input(&mut self, path: &Path) -> Result<DecoderSession> {
        DecoderSession::open(path)
    }

    fn open_output(&mut self, path: &Path, input: &StreamDescriptor) -> Result<EncoderSession> {
        EncoderSession::open(path, input.sample_rate, &self.config.encoder)
    }

    fn init_resampler(
        &mut self,
        input: &StreamDescriptor,
        output: &StreamDescriptor,
    ) -> Result<SampleResampler> {
        SampleResampler::new(input, output)
    }
}
