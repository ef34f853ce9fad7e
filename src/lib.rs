pub mod config;
pub mod error;
pub mod ffmpeg_utils;
pub mod transcode;
pub mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{LogFormat, TranscodeConfig};
pub use error::{ErrorKind, FfmpegError, Result, TranscodeError};
pub use ffmpeg_utils::version_info as ffmpeg_version_info;
pub use ffmpeg_utils::{init, install_log_filter};
pub use transcode::pipeline::{transcode_file, Pipeline, PipelineState};
pub use transcode::FfmpegBackend;
pub use types::{StreamDescriptor, TranscodeReport};
