//! Encoder session for the transcoding pipeline
//!
//! Owns the output format context (and its file handle) plus an AAC encoder
//! configured for stereo output at the input's sample rate. Every packet the
//! encoder produces is written to the container straight away.

use std::path::Path;

use crate::config::EncoderConfig;
use crate::error::{describe, FfmpegError, Result, TranscodeError};
use crate::ffmpeg_utils::helpers::{encoder_codec_parameters, guess_output_format};
use crate::types::{EncodeOutcome, StreamDescriptor, OUTPUT_CHANNELS};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use super::pipeline::PipelineState;
use super::AudioEncode;

/// Output codec
pub const OUTPUT_CODEC: codec::Id = codec::Id::AAC;
/// Sample format used when the encoder does not list the formats it accepts
pub const FALLBACK_SAMPLE_FMT: Sample = Sample::F32(ffmpeg::util::format::sample::Type::Planar);
/// Frame size used when the encoder accepts variable-sized frames
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// Output container plus the AAC encoder feeding it
pub struct EncoderSession {
    // Field order is drop order: encoder first, then the format context,
    // which closes the output file.
    encoder: ffmpeg::encoder::Audio,
    output: ffmpeg::format::context::Output,
    descriptor: StreamDescriptor,
    container: String,
    stream_index: usize,
    frame_size: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    /// EOF has been sent to the encoder; only buffered packets remain.
    flushing: bool,
    packets_written: u64,
}

impl EncoderSession {
    /// Create `path`, pick its container from the extension and open an AAC
    /// encoder at `sample_rate`.
    pub fn open(path: &Path, sample_rate: u32, config: &EncoderConfig) -> Result<Self> {
        let container = guess_output_format(path)
            .ok_or_else(|| TranscodeError::NoSuchContainer(path.to_path_buf()))?;

        let codec = codec::encoder::find(OUTPUT_CODEC)
            .ok_or_else(|| TranscodeError::UnsupportedCodec("Could not find an AAC encoder".into()))?;

        let mut output = ffmpeg::format::output(&path).map_err(|e| {
            FfmpegError::OpenOutput(format!("Could not open '{}': {}", path.display(), describe(e)))
        })?;

        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);
        let time_base = ffmpeg::Rational::new(1, sample_rate as i32);

        // Build context and configure the audio encoder BEFORE opening
        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(time_base);
        if config.experimental {
            context.compliance(codec::Compliance::Experimental);
        }
        if global_header {
            context.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            FfmpegError::EncoderCreate(format!("Cannot get audio encoder handle: {}", describe(e)))
        })?;

        audio_enc.set_rate(sample_rate as i32);
        audio_enc.set_format(preferred_sample_format(codec));
        audio_enc.set_channel_layout(ChannelLayout::default(OUTPUT_CHANNELS as i32));
        audio_enc.set_bit_rate(config.bit_rate);

        let encoder = audio_enc
            .open_as(codec)
            .map_err(|e| FfmpegError::EncoderCreate(describe(e)))?;

        let frame_size = match encoder.frame_size() as usize {
            0 => DEFAULT_FRAME_SIZE,
            n => n,
        };

        let stream_index = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| FfmpegError::StreamConfig(describe(e)))?;
            stream.set_parameters(encoder_codec_parameters(&encoder));
            stream.set_time_base(time_base);
            stream.index()
        };

        let descriptor = StreamDescriptor {
            codec_id: OUTPUT_CODEC,
            sample_format: encoder.format(),
            sample_rate: encoder.rate(),
            channels: OUTPUT_CHANNELS,
            channel_layout: ChannelLayout::default(OUTPUT_CHANNELS as i32),
        };

        tracing::debug!(
            path = %path.display(),
            container = %container,
            sample_rate,
            bit_rate = config.bit_rate,
            frame_size,
            global_header,
            "output opened"
        );

        Ok(Self {
            encoder,
            output,
            descriptor,
            container,
            stream_index,
            frame_size,
            encoder_time_base: time_base,
            stream_time_base: time_base,
            flushing: false,
            packets_written: 0,
        })
    }

    /// Short name of the muxer in use (e.g. `mp4`).
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    /// Receive every packet the encoder has ready and mux it.
    fn drain_packets(&mut self) -> Result<usize> {
        let mut written = 0;
        loop {
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    self.write_packet(&mut packet)?;
                    written += 1;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(FfmpegError::EncodeFrame(describe(e)).into()),
            }
        }
        Ok(written)
    }

    fn write_packet(&mut self, packet: &mut ffmpeg::codec::packet::Packet) -> Result<()> {
        packet.set_stream(self.stream_index);
        packet.set_position(-1);
        packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
        packet
            .write(&mut self.output)
            .map_err(|e| FfmpegError::WritePacket(describe(e)))?;
        self.packets_written += 1;
        tracing::trace!(pts = ?packet.pts(), size = packet.size(), "packet written");
        Ok(())
    }
}

impl AudioEncode for EncoderSession {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn write_header(&mut self) -> Result<()> {
        self.output
            .write_header()
            .map_err(|e| FfmpegError::WriteHeader(describe(e)))?;
        // The muxer may pick its own time base for the stream.
        if let Some(stream) = self.output.stream(self.stream_index) {
            self.stream_time_base = stream.time_base();
        }
        tracing::debug!(time_base = ?self.stream_time_base, "output header written");
        Ok(())
    }

    fn encode(
        &mut self,
        frame: Option<ffmpeg::util::frame::Audio>,
        state: &mut PipelineState,
    ) -> Result<EncodeOutcome> {
        let sent = match frame {
            Some(mut frame) => {
                state.stamp(&mut frame);
                self.encoder.send_frame(&frame)
            }
            None if !self.flushing => {
                self.flushing = true;
                self.encoder.send_eof()
            }
            // EOF already sent; only collect what is still buffered.
            None => Ok(()),
        };

        match sent {
            Ok(()) => {}
            // The encoder has nothing more to encode; still collect packets.
            Err(ffmpeg::Error::Eof) => {}
            Err(e) => {
                return Err(FfmpegError::EncodeFrame(format!(
                    "Could not send frame for encoding: {}",
                    describe(e)
                ))
                .into())
            }
        }

        match self.drain_packets()? {
            0 => Ok(EncodeOutcome::NoData),
            packets => Ok(EncodeOutcome::Data { packets }),
        }
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.output
            .write_trailer()
            .map_err(|e| FfmpegError::WriteTrailer(describe(e)))?;
        tracing::debug!(packets = self.packets_written, "output trailer written");
        Ok(())
    }
}

/// First sample format `codec` offers, or FLTP if it does not say.
pub fn preferred_sample_format(codec: codec::Codec) -> Sample {
    codec
        .audio()
        .ok()
        .and_then(|audio| audio.formats())
        .and_then(|mut formats| formats.next())
        .unwrap_or(FALLBACK_SAMPLE_FMT)
}

/// Check whether the FFmpeg build includes an AAC encoder.
pub fn is_aac_encoder_available() -> bool {
    codec::encoder::find(OUTPUT_CODEC).is_some()
}
