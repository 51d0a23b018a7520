use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for the audio processing core.
///
/// Every public operation fails with one of these kinds. Variants carry the
/// offending path and the last processed timestamp where that context exists.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Caller violated a precondition; surfaced before any I/O happens
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Trim bounds inconsistent with each other or with the input duration
    #[error("invalid range: start={start_ms}ms end={end_ms}ms: {reason}")]
    InvalidRange {
        start_ms: u64,
        end_ms: u64,
        reason: String,
    },

    /// The input container or codec is not handled by this crate
    #[error("unsupported format: {path}: {detail}", path = .path.display())]
    UnsupportedFormat { path: PathBuf, detail: String },

    /// File open/read/write/seek failed
    #[error("io error: {path}: {message}", path = .path.display())]
    Io { path: PathBuf, message: String },

    /// Decoder/encoder/resampler refused configuration or reported a fatal state
    #[error("codec error: {0}")]
    Codec(#[from] FfmpegError),

    /// The back-pressure retry budget or the idle watchdog was exhausted
    #[error("pipeline stalled: {context} (last pts {last_pts_us}us)")]
    PipelineStalled { context: String, last_pts_us: i64 },

    /// Hard wall-clock or iteration cap exceeded
    #[error("timeout after {elapsed_secs}s / {iterations} iterations (last pts {last_pts_us}us)")]
    Timeout {
        elapsed_secs: u64,
        iterations: u64,
        last_pts_us: i64,
    },

    /// Cancellation signal observed; partial output has been removed
    #[error("operation cancelled")]
    Cancelled,

    /// The muxer rejected a sample or a lifecycle transition
    #[error("muxer error: {0}")]
    Muxer(String),
}

impl AudioError {
    /// Build an `Io` error from a path and anything displayable.
    pub(crate) fn io(path: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        AudioError::Io {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    pub(crate) fn unsupported(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        AudioError::UnsupportedFormat {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// FFmpeg-specific errors.
///
/// Internal detail type; converts into [`AudioError::Codec`].
#[derive(Error, Debug)]
pub enum FfmpegError {
    /// Failure during global FFmpeg initialization
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    /// The requested decoder was not found or could not be created
    #[error("failed to create decoder: {0}")]
    DecoderCreate(String),

    /// The AAC encoder was not found in this FFmpeg build
    #[error("failed to find encoder: {0}")]
    EncoderNotFound(String),

    /// Failure applying configuration parameters to the encoder
    #[error("failed to configure encoder: {0}")]
    EncoderConfigure(String),

    /// Failure creating an audio resampler
    #[error("failed to create resampler: {0}")]
    ResamplerCreate(String),

    /// Failure decoding a packet into a PCM frame
    #[error("failed to decode packet: {0}")]
    DecodePacket(String),

    /// Failure encoding a PCM frame into a packet
    #[error("failed to encode frame: {0}")]
    EncodeFrame(String),

    /// Failure converting PCM between sample layouts
    #[error("failed to resample frame: {0}")]
    ResampleFrame(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AudioError>;
