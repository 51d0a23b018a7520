//! Lossless stream copy.
//!
//! Remuxes the compressed elementary stream into a fresh M4A container
//! without touching a codec: demux → time-range gate → mux. The track is
//! registered from the demuxer-reported parameters (codec-specific data
//! included) and timestamps are rebased so the output starts at zero.
//! The API surface only routes AAC/MP4-family inputs here.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::demux::Demuxer;
use crate::error::{AudioError, Result};
use crate::ffmpeg_utils::helpers;
use crate::mux::Mp4Muxer;
use crate::progress::{CancelToken, OperationTag, ProgressSink, ProgressTracker};
use crate::range::{GateDecision, RangeGate};
use crate::transcode::pipeline::verify_output;
use crate::types::{ConversionResult, TimeRange};

/// AAC frame duration backfill for containers that omit per-sample
/// durations.
const AAC_FRAME_SAMPLES: i64 = 1024;

/// Wall-clock cap; there is no codec to stall, but a truncated container
/// can still make the demuxer spin.
const MAX_WALL_CLOCK: Duration = Duration::from_secs(120);

/// Copy one file's audio stream into an M4A container, optionally
/// restricted to a time range.
pub(crate) fn copy_stream(
    input: &Path,
    output: &Path,
    range: Option<TimeRange>,
    tag: OperationTag,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ConversionResult> {
    crate::ffmpeg_utils::init()?;
    let mut progress = ProgressTracker::new(sink, tag);

    match run_copy(input, output, range, cancel, &mut progress) {
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

fn run_copy(
    input: &Path,
    output: &Path,
    range: Option<TimeRange>,
    cancel: &CancelToken,
    progress: &mut ProgressTracker<'_>,
) -> Result<ConversionResult> {
    let mut demuxer = Demuxer::open(input)?;
    demuxer.select_first_audio()?;

    let params = demuxer.parameters()?;
    let sample_rate = demuxer.sample_rate()?.max(1);
    let bit_rate_bps = helpers::codec_params_bit_rate(&params);
    let time_base = demuxer.time_base()?;
    let duration_us = demuxer.duration_us()?;

    let mut muxer = Mp4Muxer::create(output)?;
    // No FormatChanged on this path: the input descriptor already carries
    // everything the container needs, so the track is registered up front.
    let track_id = muxer.add_track(&params, sample_rate)?;
    muxer.start()?;

    let mut gate = RangeGate::new(range);
    gate.prime(&mut demuxer)?;
    let expected_us = gate.expected_duration_us(duration_us);

    let result = pump_copy(
        &mut demuxer,
        &mut gate,
        &mut muxer,
        track_id,
        time_base,
        sample_rate,
        expected_us,
        cancel,
        progress,
    );
    if let Err(e) = result {
        muxer.close();
        return Err(e);
    }
    muxer.stop()?;

    let frame_duration_us = AAC_FRAME_SAMPLES * 1_000_000 / sample_rate as i64;
    let duration_ms = muxer
        .last_pts_us(track_id)
        .map(|last| ((last + frame_duration_us).max(0) as u64) / 1000)
        .unwrap_or(0);

    Ok(ConversionResult {
        output_path: output.to_path_buf(),
        duration_ms,
        bit_rate_kbps: ((bit_rate_bps + 500) / 1000) as u32,
        sample_rate_hz: sample_rate,
        files_processed: 1,
    })
}

#[allow(clippy::too_many_arguments)]
fn pump_copy(
    demuxer: &mut Demuxer,
    gate: &mut RangeGate,
    muxer: &mut Mp4Muxer,
    track_id: usize,
    time_base: ffmpeg_next::Rational,
    sample_rate: u32,
    expected_us: i64,
    cancel: &CancelToken,
    progress: &mut ProgressTracker<'_>,
) -> Result<()> {
    let started = Instant::now();
    // Rebase anchor in stream-native ticks, so no precision is lost to a
    // microsecond round trip
    let mut base_raw_ts: Option<i64> = None;
    let fallback_duration =
        helpers::micros_to_ts(AAC_FRAME_SAMPLES * 1_000_000 / sample_rate as i64, time_base);

    loop {
        if cancel.is_cancelled() {
            return Err(AudioError::Cancelled);
        }
        if started.elapsed() > MAX_WALL_CLOCK {
            return Err(AudioError::Timeout {
                elapsed_secs: started.elapsed().as_secs(),
                iterations: muxer.samples_written(track_id),
                last_pts_us: muxer.last_pts_us(track_id).unwrap_or(0),
            });
        }

        let au = match demuxer.next()? {
            Some(au) => au,
            None => return Ok(()),
        };
        let pts_us = au.pts_us;

        match gate.admit(au) {
            GateDecision::Feed { mut au, .. } => {
                let raw_ts = au.packet.pts().or(au.packet.dts()).unwrap_or(0);
                let base = *base_raw_ts.get_or_insert(raw_ts);
                let rebased = raw_ts - base;
                au.packet.set_pts(Some(rebased));
                au.packet.set_dts(Some(rebased));
                // Sample flags (sync) travel inside the packet untouched
                if au.packet.duration() == 0 {
                    au.packet.set_duration(fallback_duration);
                }
                muxer.write_sample(track_id, &mut au.packet, time_base)?;

                if expected_us > 0 {
                    progress.update(gate.processed_us(pts_us) as f64 / expected_us as f64);
                }
            }
            GateDecision::Skip => {}
            GateDecision::End => return Ok(()),
        }
    }
}
