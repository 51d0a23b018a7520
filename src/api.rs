//! Public operations.
//!
//! Thin validated façade over the engines: every precondition is checked
//! here before any I/O happens, output directories are created
//! idempotently, and `format=copy` requests are routed through the
//! capability flags so only AAC/MP4-family inputs reach the lossless
//! path.

use std::path::{Path, PathBuf};

use crate::copy;
use crate::error::{AudioError, Result};
use crate::info;
use crate::progress::{CancelToken, OperationTag, ProgressSink};
use crate::splice;
use crate::transcode::pipeline;
use crate::types::{
    AudioInfo, ConversionRequest, ConversionResult, EncoderSettings, OutputFormat, TimeRange,
    WaveformEnvelope, MAX_WAVEFORM_SPS, MIN_WAVEFORM_SPS,
};

pub use crate::transcode::encoder::is_aac_encoder_available;

/// Inspect a file and return its diagnostic report.
///
/// Unreadable audio yields [`AudioInfo::Invalid`] instead of an error;
/// only filesystem failures surface as `Io`.
pub fn get_audio_info(path: impl AsRef<Path>) -> Result<AudioInfo> {
    let path = path.as_ref();
    validate_path(path, "input")?;
    info::inspect(path)
}

/// Whether the file can be processed at all. Never errors; anything
/// unreadable is simply `false`.
pub fn is_format_supported(path: impl AsRef<Path>) -> bool {
    match info::inspect(path.as_ref()) {
        Ok(AudioInfo::Valid(facts)) => facts.capabilities.convertible,
        _ => false,
    }
}

/// Convert a whole file into an M4A container.
///
/// `OutputFormat::M4a` transcodes to AAC-LC with the given settings;
/// `OutputFormat::Copy` remuxes the elementary stream unchanged and is
/// rejected with `UnsupportedFormat` for inputs that are not
/// lossless-trimmable (MP3/WAV/OGG must transcode).
pub fn convert_audio(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    format: OutputFormat,
    settings: &EncoderSettings,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ConversionResult> {
    let request = ConversionRequest {
        input: input.as_ref().to_path_buf(),
        output: output.as_ref().to_path_buf(),
        format,
        settings: *settings,
    };
    request.validate()?;

    // Full-file copy and full-file transcode both report as "convert"
    dispatch(&request, None, OperationTag::Convert, OperationTag::Convert, progress, cancel)
}

/// Extract `[start_ms, end_ms)` of a file into an M4A container.
///
/// The output's first timestamp is zero. `OutputFormat::Copy` skips the
/// codecs entirely when the input allows it.
#[allow(clippy::too_many_arguments)]
pub fn trim_audio(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start_ms: u64,
    end_ms: u64,
    format: OutputFormat,
    settings: &EncoderSettings,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ConversionResult> {
    let request = ConversionRequest {
        input: input.as_ref().to_path_buf(),
        output: output.as_ref().to_path_buf(),
        format,
        settings: *settings,
    };
    request.validate()?;

    if end_ms <= start_ms {
        return Err(AudioError::InvalidRange {
            start_ms,
            end_ms,
            reason: "end must be greater than start".into(),
        });
    }

    // Bounds against the real duration require opening the file; all
    // no-I/O checks are done by this point.
    if let AudioInfo::Valid(facts) = info::inspect(&request.input)? {
        if facts.duration_ms > 0 && start_ms >= facts.duration_ms {
            return Err(AudioError::InvalidRange {
                start_ms,
                end_ms,
                reason: format!("start beyond input duration of {}ms", facts.duration_ms),
            });
        }
    }

    let range = Some(TimeRange::from_millis(start_ms, end_ms));
    dispatch(
        &request,
        range,
        OperationTag::Trim,
        OperationTag::TrimLossless,
        progress,
        cancel,
    )
}

/// Route a validated request to the transcode or lossless-copy engine.
fn dispatch(
    request: &ConversionRequest,
    range: Option<TimeRange>,
    transcode_tag: OperationTag,
    copy_tag: OperationTag,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ConversionResult> {
    prepare_output_dir(&request.output)?;

    match request.format {
        OutputFormat::M4a => pipeline::transcode_file(
            &request.input,
            &request.output,
            range,
            &request.settings,
            transcode_tag,
            progress,
            cancel,
        ),
        OutputFormat::Copy => {
            require_lossless(&request.input)?;
            copy::copy_stream(&request.input, &request.output, range, copy_tag, progress, cancel)
        }
    }
}

/// Concatenate the inputs, in order, into one M4A output.
///
/// All inputs are decoded and re-encoded into one AAC stream whose
/// rate/channel grid comes from the first input.
pub fn splice_audio(
    inputs: &[PathBuf],
    output: impl AsRef<Path>,
    settings: &EncoderSettings,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ConversionResult> {
    let output = output.as_ref();
    if inputs.is_empty() {
        return Err(AudioError::InvalidArguments(
            "splice requires at least one input".into(),
        ));
    }
    for input in inputs {
        validate_path(input, "input")?;
    }
    validate_path(output, "output")?;
    settings.validate()?;

    prepare_output_dir(output)?;
    splice::splice_files(inputs, output, settings, progress, cancel)
}

/// Extract the amplitude envelope of a file at the given resolution.
pub fn extract_waveform(
    input: impl AsRef<Path>,
    samples_per_second: u32,
    progress: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<WaveformEnvelope> {
    let input = input.as_ref();
    validate_path(input, "input")?;
    if !(MIN_WAVEFORM_SPS..=MAX_WAVEFORM_SPS).contains(&samples_per_second) {
        return Err(AudioError::InvalidArguments(format!(
            "samples_per_second {} outside [{}, {}]",
            samples_per_second, MIN_WAVEFORM_SPS, MAX_WAVEFORM_SPS
        )));
    }
    crate::waveform::extract(input, samples_per_second, progress, cancel)
}

fn validate_path(path: &Path, which: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(AudioError::InvalidArguments(format!(
            "{} path must not be empty",
            which
        )));
    }
    Ok(())
}

/// Create the output's parent directory if needed. Idempotent.
fn prepare_output_dir(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| AudioError::io(parent, e))?;
        }
    }
    Ok(())
}

/// The lossless path only handles MP4-muxable AAC elementary streams;
/// everything else is refused rather than silently re-encoded.
fn require_lossless(input: &Path) -> Result<()> {
    match info::inspect(input)? {
        AudioInfo::Valid(facts) if facts.capabilities.lossless_trimmable => Ok(()),
        AudioInfo::Valid(facts) => Err(AudioError::unsupported(
            input,
            format!("{} cannot be copied losslessly; use format=m4a", facts.mime),
        )),
        AudioInfo::Invalid { details, .. } => Err(AudioError::unsupported(input, details)),
    }
}
