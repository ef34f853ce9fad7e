//! Decoder session for the transcoding pipeline
//!
//! Owns the input format context and the decoder opened for its single audio
//! stream, and turns compressed packets into raw PCM frames.

use std::path::Path;

use crate::error::{describe, FfmpegError, Result, TranscodeError};
use crate::types::{layout_or_default, DecodeOutcome, StreamDescriptor};
use ffmpeg_next as ffmpeg;

use super::AudioDecode;

/// Input file plus the decoder for its only stream
pub struct DecoderSession {
    // Field order is drop order: the codec context goes before the format
    // context it was opened from.
    decoder: ffmpeg::decoder::Audio,
    input: ffmpeg::format::context::Input,
    descriptor: StreamDescriptor,
    stream_index: usize,
    /// EOF has been sent to the decoder; only delayed frames remain.
    eof_sent: bool,
    /// The last receive produced a frame, so more may be buffered.
    frame_pending: bool,
    finished: bool,
}

impl DecoderSession {
    /// Open `path`, check that it holds exactly one audio stream and open a
    /// decoder for it.
    pub fn open(path: &Path) -> Result<Self> {
        // Surface a missing file as a plain I/O error rather than an FFmpeg code.
        std::fs::metadata(path)?;

        let input = ffmpeg::format::input(&path).map_err(|e| {
            FfmpegError::OpenInput(format!("Could not open '{}': {}", path.display(), describe(e)))
        })?;

        validate_stream_count(input.streams().count())?;

        let stream = input
            .stream(0)
            .ok_or(TranscodeError::StreamCount { found: 0 })?;
        let stream_index = stream.index();
        let params = stream.parameters();

        if params.medium() != ffmpeg::media::Type::Audio {
            return Err(TranscodeError::NotAudio(format!("{:?}", params.medium())));
        }

        let codec_id = params.id();
        if ffmpeg::codec::decoder::find(codec_id).is_none() {
            return Err(TranscodeError::UnsupportedCodec(format!(
                "no decoder for {}",
                codec_id.name()
            )));
        }

        let context = ffmpeg::codec::Context::from_parameters(params).map_err(|e| {
            FfmpegError::DecoderCreate(format!(
                "Could not allocate a decoding context for stream {}: {}",
                stream_index,
                describe(e)
            ))
        })?;

        let decoder = context.decoder().audio().map_err(|e| {
            FfmpegError::DecoderCreate(format!(
                "Failed to open audio decoder for stream {}: {}",
                stream_index,
                describe(e)
            ))
        })?;

        let channels = decoder.channels();
        let descriptor = StreamDescriptor {
            codec_id,
            sample_format: decoder.format(),
            sample_rate: decoder.rate(),
            channels,
            channel_layout: layout_or_default(decoder.channel_layout(), channels),
        };

        tracing::debug!(
            path = %path.display(),
            codec = codec_id.name(),
            sample_rate = descriptor.sample_rate,
            channels,
            format = ?descriptor.sample_format,
            "input opened"
        );

        Ok(Self {
            decoder,
            input,
            descriptor,
            stream_index,
            eof_sent: false,
            frame_pending: false,
            finished: false,
        })
    }

    /// Read one packet and hand it to the decoder; at end of file, put the
    /// decoder into draining mode instead.
    fn feed(&mut self) -> Result<()> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                if packet.stream() != self.stream_index {
                    return Ok(());
                }
                self.decoder.send_packet(&packet).map_err(|e| {
                    FfmpegError::DecodePacket(format!(
                        "Could not send packet for decoding: {}",
                        describe(e)
                    ))
                })?;
                Ok(())
            }
            Err(ffmpeg::Error::Eof) => {
                tracing::debug!("end of input reached, draining decoder");
                self.send_eof()
            }
            Err(e) => Err(FfmpegError::ReadFrame(describe(e)).into()),
        }
    }

    /// Send EOF to flush the decoder's internal buffers.
    ///
    /// EAGAIN and EOF responses are ignored: the decoder has nothing buffered
    /// or is already finished.
    fn send_eof(&mut self) -> Result<()> {
        self.eof_sent = true;
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_eof error on stream {}: {}",
                self.stream_index,
                describe(e)
            ))
            .into()),
        }
    }

    fn receive(&mut self) -> Result<DecodeOutcome> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                self.frame_pending = true;
                Ok(DecodeOutcome::Frame(frame))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                self.frame_pending = false;
                if self.eof_sent {
                    // A draining decoder never asks for more input.
                    tracing::warn!("decoder requested input after EOF, treating as end of stream");
                    self.finished = true;
                    return Ok(DecodeOutcome::EndOfStream);
                }
                Ok(DecodeOutcome::NoData)
            }
            Err(ffmpeg::Error::Eof) => {
                self.frame_pending = false;
                self.finished = true;
                Ok(DecodeOutcome::EndOfStream)
            }
            Err(e) => Err(FfmpegError::DecodePacket(describe(e)).into()),
        }
    }
}

impl AudioDecode for DecoderSession {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn decode_next(&mut self) -> Result<DecodeOutcome> {
        if self.finished {
            return Ok(DecodeOutcome::EndOfStream);
        }

        // One packet can decode to several frames; hand those out first.
        if self.frame_pending {
            match self.receive()? {
                DecodeOutcome::NoData => {}
                outcome => return Ok(outcome),
            }
        }

        if !self.eof_sent {
            self.feed()?;
        }
        self.receive()
    }
}

/// Only single-stream inputs are accepted.
pub fn validate_stream_count(found: usize) -> Result<()> {
    if found != 1 {
        return Err(TranscodeError::StreamCount { found });
    }
    Ok(())
}
