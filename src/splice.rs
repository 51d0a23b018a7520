//! Splice orchestrator.
//!
//! Concatenates several inputs into one M4A output. A single encoder and
//! a single muxer live for the whole run; each input gets a fresh
//! demuxer/decoder pair because source codecs may differ. The shared
//! encoder stage's output sample counter carries the cumulative timestamp
//! offset, so timestamps written to the muxer are strictly non-decreasing
//! across input boundaries. EOS reaches the encoder only after the last
//! input.

use std::path::{Path, PathBuf};

use crate::demux::Demuxer;
use crate::error::{AudioError, Result};
use crate::mux::Mp4Muxer;
use crate::progress::{CancelToken, OperationTag, ProgressSink, ProgressTracker};
use crate::range::RangeGate;
use crate::transcode::decoder::AudioDecoder;
use crate::transcode::encoder::ResolvedEncoderConfig;
use crate::transcode::pipeline::{run_input, verify_output, EncoderStage, Watchdog};
use crate::types::{ConversionResult, EncoderSettings};

pub(crate) fn splice_files(
    inputs: &[PathBuf],
    output: &Path,
    settings: &EncoderSettings,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ConversionResult> {
    crate::ffmpeg_utils::init()?;
    let mut progress = ProgressTracker::new(sink, OperationTag::Splice);

    match run_splice(inputs, output, settings, cancel, &mut progress) {
        Ok(result) => {
            verify_output(output)?;
            progress.finish();
            Ok(result)
        }
        Err(AudioError::Cancelled) => {
            std::fs::remove_file(output).ok();
            Err(AudioError::Cancelled)
        }
        Err(e) => Err(e),
    }
}

fn run_splice(
    inputs: &[PathBuf],
    output: &Path,
    settings: &EncoderSettings,
    cancel: &CancelToken,
    progress: &mut ProgressTracker<'_>,
) -> Result<ConversionResult> {
    // The encoder grid (rate/channels) is fixed by the first input; later
    // inputs are resampled into it.
    let config = {
        let mut first = Demuxer::open(&inputs[0])?;
        first.select_first_audio()?;
        ResolvedEncoderConfig::resolve(first.sample_rate()?, first.channels()?, settings)
    };

    let mut stage = EncoderStage::new(config)?;
    let mut muxer = Mp4Muxer::create(output)?;
    let total = inputs.len();

    let mut run: Result<()> = Ok(());
    for (i, input) in inputs.iter().enumerate() {
        progress.set_window(i as f64 / total as f64, 1.0 / total as f64);

        run = pump_one_input(input, &mut stage, &mut muxer, cancel, progress);
        if run.is_err() {
            break;
        }
        tracing::debug!(
            input = %input.display(),
            index = i,
            "splice input complete"
        );
    }

    if run.is_ok() {
        // Only now does the encoder learn the stream is over
        let mut watchdog = Watchdog::new();
        run = stage.finish(&mut muxer, &mut watchdog);
    }
    if run.is_ok() {
        run = muxer.stop();
    }
    if let Err(e) = run {
        muxer.close();
        return Err(e);
    }

    Ok(ConversionResult {
        output_path: output.to_path_buf(),
        duration_ms: stage.accepted_duration_ms(),
        bit_rate_kbps: settings.bit_rate_kbps,
        sample_rate_hz: config.sample_rate,
        files_processed: total,
    })
}

/// Decode one input fully into the shared encoder stage, draining encoder
/// output as it appears. No EOS is signaled here.
fn pump_one_input(
    input: &Path,
    stage: &mut EncoderStage,
    muxer: &mut Mp4Muxer,
    cancel: &CancelToken,
    progress: &mut ProgressTracker<'_>,
) -> Result<()> {
    let mut demuxer = Demuxer::open(input)?;
    demuxer.select_first_audio()?;
    let duration_us = demuxer.duration_us()?;

    let mut decoder = AudioDecoder::open(demuxer.parameters()?)?;
    let mut gate = RangeGate::new(None);
    let mut watchdog = Watchdog::new();

    run_input(
        &mut demuxer,
        &mut decoder,
        &mut gate,
        stage,
        muxer,
        &mut watchdog,
        progress,
        cancel,
        duration_us,
    )?;

    // Let any output the encoder already has reach the muxer before the
    // per-input decoder is released
    stage.pump(muxer)?;
    Ok(())
}
