pub(crate) mod api;
pub(crate) mod copy;
pub(crate) mod demux;
pub(crate) mod error;
pub(crate) mod ffmpeg_utils;
pub(crate) mod info;
pub(crate) mod mux;
pub(crate) mod progress;
pub(crate) mod range;
pub(crate) mod splice;
pub(crate) mod transcode;
pub(crate) mod types;
pub(crate) mod waveform;

#[cfg(test)]
pub(crate) mod test_wav;

pub use api::*;
pub use error::{AudioError, FfmpegError, Result};
pub use ffmpeg_utils::version_info as ffmpeg_version_info;
pub use ffmpeg_utils::{init, install_log_filter};
pub use progress::{
    CancelToken, FnProgress, NoProgress, OperationTag, ProgressSink, ProgressUpdate,
};
pub use types::{
    AudioFacts, AudioInfo, CapabilityFlags, ConversionRequest, ConversionResult, EncoderSettings,
    InfoErrorKind, OutputFormat, TimeRange, TrackFormat, TrackKind, WaveformEnvelope,
    MAX_BIT_RATE_KBPS, MAX_WAVEFORM_SPS, MIN_BIT_RATE_KBPS, MIN_WAVEFORM_SPS,
    SUPPORTED_SAMPLE_RATES,
};
