use std::path::PathBuf;

use ffmpeg_next as ffmpeg;
use thiserror::Error;

/// Main error type for the transcoder
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// An error originating from the underlying FFmpeg library
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input container does not hold exactly one stream
    #[error("Expected one audio input stream, but found {found}")]
    StreamCount { found: usize },

    /// The single input stream is not an audio stream
    #[error("Input stream is not audio (found {0})")]
    NotAudio(String),

    /// No decoder or encoder is registered for the codec
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// No muxer matches the output file extension
    #[error("Could not find output file format for {0:?}")]
    NoSuchContainer(PathBuf),

    /// Input and output sample rates differ; the resampler never converts rates
    #[error("Sample rate mismatch: input {input} Hz, output {output} Hz")]
    RateMismatch { input: u32, output: u32 },

    /// A sample buffer could not be allocated or grown
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// The FIFO accepted fewer samples than requested
    #[error("Could not write data to FIFO: requested {requested}, written {written}")]
    ShortWrite { requested: usize, written: usize },

    /// The FIFO held fewer samples than the caller asked for
    #[error("Could not read data from FIFO: requested {requested}, available {available}")]
    ShortRead { requested: usize, available: usize },

    /// A converted block does not match the layout of the FIFO it is written to
    #[error("Sample layout mismatch: {0}")]
    LayoutMismatch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// Failure opening an input media file
    #[error("Could not open input file: {0}")]
    OpenInput(String),

    /// Failure instantiating or opening a decoder
    #[error("Could not open input codec: {0}")]
    DecoderCreate(String),

    /// Failure opening the output file or its format context
    #[error("Could not open output file: {0}")]
    OpenOutput(String),

    /// Failure adding the audio stream to the output container
    #[error("Could not create new stream: {0}")]
    StreamConfig(String),

    /// Failure instantiating or opening an encoder
    #[error("Could not open output codec: {0}")]
    EncoderCreate(String),

    /// Failure creating or initialising the resampler
    #[error("Could not open resample context: {0}")]
    ResamplerCreate(String),

    /// Failure reading a packet from the input context
    #[error("Could not read frame: {0}")]
    ReadFrame(String),

    /// Failure sending a packet to, or receiving a frame from, the decoder
    #[error("Could not decode frame: {0}")]
    DecodePacket(String),

    /// Failure converting samples in the resampler
    #[error("Could not convert input samples: {0}")]
    Convert(String),

    /// Failure sending a frame to, or receiving a packet from, the encoder
    #[error("Could not encode frame: {0}")]
    EncodeFrame(String),

    /// Failure writing the container header
    #[error("Could not write output file header: {0}")]
    WriteHeader(String),

    /// Failure writing a media packet to the container
    #[error("Could not write frame: {0}")]
    WritePacket(String),

    /// Failure writing the container trailer
    #[error("Could not write output file trailer: {0}")]
    WriteTrailer(String),
}

/// Coarse classification of a failure, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Allocation,
    Conversion,
    Codec,
    Mux,
    Config,
}

impl TranscodeError {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscodeError::Ffmpeg(e) => e.kind(),
            TranscodeError::Io(_) => ErrorKind::Io,
            TranscodeError::StreamCount { .. }
            | TranscodeError::NotAudio(_)
            | TranscodeError::UnsupportedCodec(_)
            | TranscodeError::NoSuchContainer(_) => ErrorKind::Format,
            TranscodeError::RateMismatch { .. } | TranscodeError::LayoutMismatch(_) => {
                ErrorKind::Conversion
            }
            TranscodeError::Allocation(_)
            | TranscodeError::ShortWrite { .. }
            | TranscodeError::ShortRead { .. } => ErrorKind::Allocation,
            TranscodeError::Config(_) => ErrorKind::Config,
        }
    }
}

impl FfmpegError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FfmpegError::InitFailed(_) => ErrorKind::Config,
            FfmpegError::OpenInput(_) | FfmpegError::ReadFrame(_) | FfmpegError::OpenOutput(_) => {
                ErrorKind::Io
            }
            FfmpegError::StreamConfig(_) => ErrorKind::Format,
            FfmpegError::DecoderCreate(_)
            | FfmpegError::EncoderCreate(_)
            | FfmpegError::DecodePacket(_)
            | FfmpegError::EncodeFrame(_) => ErrorKind::Codec,
            FfmpegError::ResamplerCreate(_) | FfmpegError::Convert(_) => ErrorKind::Conversion,
            FfmpegError::WriteHeader(_)
            | FfmpegError::WritePacket(_)
            | FfmpegError::WriteTrailer(_) => ErrorKind::Mux,
        }
    }
}

/// Render an FFmpeg error with both its text and its numeric code, e.g.
/// `Invalid data found when processing input (code -1094995529)`.
pub fn describe(err: ffmpeg::Error) -> String {
    let code: i32 = err.into();
    format!("{} (code {})", err, code)
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TranscodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_errors_are_classified() {
        assert_eq!(
            TranscodeError::StreamCount { found: 2 }.kind(),
            ErrorKind::Format
        );
        assert_eq!(
            TranscodeError::NoSuchContainer(PathBuf::from("out.xyz")).kind(),
            ErrorKind::Format
        );
        assert_eq!(
            TranscodeError::UnsupportedCodec("none".into()).kind(),
            ErrorKind::Format
        );
    }

    #[test]
    fn test_rate_mismatch_is_conversion_error() {
        let err = TranscodeError::RateMismatch {
            input: 44100,
            output: 48000,
        };
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert_eq!(
            err.to_string(),
            "Sample rate mismatch: input 44100 Hz, output 48000 Hz"
        );
    }

    #[test]
    fn test_ffmpeg_errors_keep_operation_name() {
        let err: TranscodeError = FfmpegError::WriteTrailer("boom".into()).into();
        assert_eq!(err.kind(), ErrorKind::Mux);
        assert!(err.to_string().contains("trailer"));
    }

    #[test]
    fn test_describe_includes_code() {
        let text = describe(ffmpeg::Error::Eof);
        assert!(text.contains("code"), "{}", text);
    }
}
