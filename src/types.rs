//! Shared data types for the conversion, inspection and waveform engines.

use std::path::PathBuf;

use crate::error::{AudioError, Result};

/// Sample rates accepted at the public surface, in Hz.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[
    8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000,
];

/// Bit-rate bounds accepted at the public surface, in kbps.
pub const MIN_BIT_RATE_KBPS: u32 = 32;
pub const MAX_BIT_RATE_KBPS: u32 = 320;

/// Waveform resolution bounds, in envelope samples per second.
pub const MIN_WAVEFORM_SPS: u32 = 1;
pub const MAX_WAVEFORM_SPS: u32 = 1000;

/// Target container/codec for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Decode and re-encode into an M4A (MP4) container with an AAC-LC stream
    #[default]
    M4a,
    /// Copy the compressed elementary stream into a new M4A container
    /// without touching a codec. Only valid for AAC/MP4-family inputs.
    Copy,
}

/// Caller-facing encoder knobs. Validated once at the API surface.
#[derive(Debug, Clone, Copy)]
pub struct EncoderSettings {
    /// Target bit rate in kbps, within [32, 320]
    pub bit_rate_kbps: u32,
    /// Requested output sample rate in Hz; used directly when the input
    /// rate falls outside the encoder's [8000, 48000] window
    pub sample_rate_hz: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bit_rate_kbps: 128,
            sample_rate_hz: 44100,
        }
    }
}

impl EncoderSettings {
    /// Check the public-surface bounds. Runs before any I/O.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BIT_RATE_KBPS..=MAX_BIT_RATE_KBPS).contains(&self.bit_rate_kbps) {
            return Err(AudioError::InvalidArguments(format!(
                "bit rate {}kbps outside [{}, {}]",
                self.bit_rate_kbps, MIN_BIT_RATE_KBPS, MAX_BIT_RATE_KBPS
            )));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate_hz) {
            return Err(AudioError::InvalidArguments(format!(
                "sample rate {}Hz not in the supported set",
                self.sample_rate_hz
            )));
        }
        Ok(())
    }
}

/// One convert/trim job description: where to read, where to write, and
/// how to encode. Replaces the shared mutable state the host UI used to
/// carry; the core only ever sees this struct and returns a result.
#[derive(Debug, Clone, Default)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub settings: EncoderSettings,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    /// Check every precondition that needs no I/O: non-empty paths and
    /// encoder bounds.
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(AudioError::InvalidArguments(
                "input path must not be empty".into(),
            ));
        }
        if self.output.as_os_str().is_empty() {
            return Err(AudioError::InvalidArguments(
                "output path must not be empty".into(),
            ));
        }
        self.settings.validate()
    }
}

/// A half-open presentation-time window in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_us: i64,
    pub end_us: i64,
}

impl TimeRange {
    pub fn from_millis(start_ms: u64, end_ms: u64) -> Self {
        Self {
            start_us: start_ms as i64 * 1000,
            end_us: end_ms as i64 * 1000,
        }
    }

    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }
}

/// Result of every convert/trim/copy/splice call.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub output_path: PathBuf,
    /// Actual duration written to the output, in milliseconds
    pub duration_ms: u64,
    /// Bit rate of the output stream in kbps (input bit rate for lossless copy)
    pub bit_rate_kbps: u32,
    /// Sample rate of the output stream in Hz
    pub sample_rate_hz: u32,
    /// Number of input files consumed (1 except for splice)
    pub files_processed: usize,
}

/// Amplitude envelope of an audio file for UI visualization.
///
/// Each element is the peak absolute amplitude over one bucket of
/// `max(1, pcm_sample_rate / samples_per_second)` PCM frames, normalized
/// into [0, 1].
#[derive(Debug, Clone)]
pub struct WaveformEnvelope {
    pub amplitudes: Vec<f64>,
    pub sample_rate_hz: u32,
    pub duration_ms: u64,
    pub channels: u16,
}

/// What the listed operations can do with a given input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityFlags {
    pub convertible: bool,
    pub trimmable: bool,
    /// True only for AAC/MP4-family inputs; MP3/WAV/OGG must go through
    /// the transcode path
    pub lossless_trimmable: bool,
    pub waveform_supported: bool,
}

/// Why a file could not be inspected as audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoErrorKind {
    /// The container could not be opened or parsed at all
    UnreadableContainer,
    /// The container parsed but holds no audio track
    NoAudioTrack,
}

/// Classification of a single container track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Subtitle,
    Other,
}

/// One track as reported by the demuxer, in container order.
#[derive(Debug, Clone)]
pub struct TrackFormat {
    pub index: usize,
    pub kind: TrackKind,
    /// FFmpeg codec name, e.g. "aac", "mp3", "pcm_s16le"
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bit rate in bits per second as reported by the container; 0 when absent
    pub bit_rate_bps: u64,
    /// Track duration in microseconds; 0 when the container does not say
    pub duration_us: i64,
    pub language: Option<String>,
}

/// Everything the inspector learned about a readable audio file.
#[derive(Debug, Clone)]
pub struct AudioFacts {
    pub file_size: u64,
    pub duration_ms: u64,
    /// MIME of the selected audio track's family, e.g. "audio/mpeg"
    pub mime: String,
    /// Codec name of the selected audio track
    pub codec: String,
    /// Bit rate in kbps; estimated from file size when the container
    /// does not report one
    pub bit_rate_kbps: u32,
    pub sample_rate_hz: u32,
    pub channels: u16,
    /// Bits per sample for PCM codecs; None for lossy codecs
    pub bit_depth: Option<u16>,
    /// Container-level metadata tags, read through untouched
    pub metadata: Vec<(String, String)>,
    pub capabilities: CapabilityFlags,
    /// Human-readable multi-line description of the file
    pub diagnostics_text: String,
    /// One summary string per track found in the container
    pub found_tracks: Vec<String>,
}

/// Structured diagnostic report for any input file.
#[derive(Debug, Clone)]
pub enum AudioInfo {
    Valid(AudioFacts),
    Invalid {
        kind: InfoErrorKind,
        details: String,
    },
}

impl AudioInfo {
    pub fn is_valid(&self) -> bool {
        matches!(self, AudioInfo::Valid(_))
    }

    pub fn facts(&self) -> Option<&AudioFacts> {
        match self {
            AudioInfo::Valid(facts) => Some(facts),
            AudioInfo::Invalid { .. } => None,
        }
    }
}
