//! FFmpeg module - provides wrappers and utilities for FFmpeg library access
//!
//! This module handles:
//! - FFmpeg initialization
//! - Routing FFmpeg's own log output into `tracing`
//! - The unsafe field accessors `ffmpeg-next` does not expose (see [`helpers`])

pub mod helpers;

pub use ffmpeg_next as ffmpeg;

/// Initialize the FFmpeg library.
///
/// Must be called once before any session is opened. Calling it again is
/// harmless.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    ffmpeg::init().map_err(|e| {
        crate::error::FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e))
    })?;

    tracing::debug!("FFmpeg initialized");

    Ok(())
}

/// Install an FFmpeg log callback that forwards library messages to `tracing`.
///
/// **Ordering:** call after `init()` and before any session is opened; the
/// callback is process-global state.
pub fn install_log_filter() {
    // SAFETY: both functions modify global FFmpeg state and are safe to call
    // after `ffmpeg::init()`. They are called once at startup.
    unsafe {
        ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_INFO as i32);
        ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages FFmpeg prints for every ordinary transcode and that carry no
/// information for the user.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Estimating duration from bitrate",
    "Qavg:",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg_next::ffi::va_list,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg_next::ffi::av_log_get_level() } {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg_next::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() {
        return;
    }

    for suppressed in SUPPRESSED_MESSAGES {
        if msg.contains(suppressed) {
            return;
        }
    }

    match level {
        l if l <= ffmpeg_next::ffi::AV_LOG_ERROR as i32 => {
            tracing::error!(target: "ffmpeg", "{}", msg)
        }
        l if l <= ffmpeg_next::ffi::AV_LOG_WARNING as i32 => {
            tracing::warn!(target: "ffmpeg", "{}", msg)
        }
        l if l <= ffmpeg_next::ffi::AV_LOG_INFO as i32 => {
            tracing::debug!(target: "ffmpeg", "{}", msg)
        }
        _ => tracing::trace!(target: "ffmpeg", "{}", msg),
    }
}

/// Get the version information of the linked FFmpeg libraries.
pub fn version_info() -> String {
    // SAFETY: reads a compile-time constant from libavutil.
    let v = unsafe { ffmpeg::ffi::avutil_version() };
    format!("libavutil {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
