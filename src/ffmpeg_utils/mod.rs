//! FFmpeg access layer.
//!
//! Handles global initialization, the log-callback filter, and the safe
//! wrappers around raw FFI reads that `ffmpeg-next` does not expose.

pub mod helpers;

pub use ffmpeg_next as ffmpeg;

/// Initialize the FFmpeg library.
///
/// Must run before any demuxer/codec is created. Every public operation
/// calls this itself, so explicit setup is optional; calling it more than
/// once is harmless.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    ffmpeg::init().map_err(|e| {
        crate::error::FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e))
    })?;
    Ok(())
}

/// Install a custom FFmpeg log callback that suppresses known-noisy
/// messages.
///
/// Seeking compressed audio and flushing the AAC encoder produce warnings
/// that are expected side effects of how this crate drives the codecs.
/// This filter keeps them out of the application log.
///
/// Must be called after [`init`] and before any threading begins, because
/// altering the global log callback is not thread-safe.
pub fn install_log_filter() {
    // SAFETY: both calls modify global FFmpeg state and are valid after
    // `ffmpeg::init()`. Callers invoke this once at startup before any
    // pipeline thread exists.
    unsafe {
        ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_WARNING as i32);
        ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Messages that are expected side effects of the pipeline design.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
    "Estimating duration from bitrate, this may be inaccurate",
    "Queue input is backward in time",
    "skipped 1 bytes of junk",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: *mut ffmpeg_next::ffi::__va_list_tag,
) {
    use std::ffi::CStr;

    if level > unsafe { ffmpeg_next::ffi::av_log_get_level() } {
        return;
    }

    // Format the message using FFmpeg's own helper
    let mut buf = [0i8; 1024];
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

    for suppressed in SUPPRESSED_MESSAGES {
        if msg.contains(suppressed) {
            return;
        }
    }

    eprint!("{}", msg);
}

/// Version information for the linked FFmpeg libraries, for diagnostics.
pub fn version_info() -> String {
    "FFmpeg 7.0+".to_string()
}
