//! Waveform amplitude envelope extraction.
//!
//! Drives demuxer → decoder (no encoder, no muxer), converts decoded PCM
//! to packed 16-bit little-endian interleaved samples at the source rate,
//! and folds them into a fixed-rate peak envelope for UI rendering.

use std::path::Path;

use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};

use crate::demux::Demuxer;
use crate::error::{AudioError, Result};
use crate::ffmpeg_utils::helpers;
use crate::progress::{CancelToken, OperationTag, ProgressSink, ProgressTracker};
use crate::transcode::decoder::{AudioDecoder, DecoderPoll};
use crate::transcode::pipeline::Watchdog;
use crate::transcode::resampler::Resampler;
use crate::types::WaveformEnvelope;

/// Folds interleaved S16 frames into per-bucket peak amplitudes.
///
/// Buckets are counted in PCM frames (one peak across all channels of a
/// frame), so the envelope length tracks `duration × samples_per_second`
/// regardless of channel count. Every interleaved value still updates the
/// running peak.
struct BucketFold {
    bucket_size: usize,
    channels: usize,
    current_peak: f64,
    filled: usize,
    total_frames: u64,
    amplitudes: Vec<f64>,
}

impl BucketFold {
    fn new(bucket_size: usize, channels: usize) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
            channels: channels.max(1),
            current_peak: 0.0,
            filled: 0,
            total_frames: 0,
            amplitudes: Vec::new(),
        }
    }

    fn push(&mut self, interleaved: &[i16]) {
        for frame in interleaved.chunks_exact(self.channels) {
            for &sample in frame {
                let amplitude = (sample as f64).abs() / 32768.0;
                if amplitude > self.current_peak {
                    self.current_peak = amplitude;
                }
            }
            self.filled += 1;
            self.total_frames += 1;
            if self.filled == self.bucket_size {
                self.amplitudes.push(self.current_peak.min(1.0));
                self.current_peak = 0.0;
                self.filled = 0;
            }
        }
    }

    /// Emit the trailing partial bucket, if any.
    fn finish(mut self) -> (Vec<f64>, u64) {
        if self.filled > 0 {
            self.amplitudes.push(self.current_peak.min(1.0));
        }
        (self.amplitudes, self.total_frames)
    }
}

/// Extract the amplitude envelope of the first audio track.
pub(crate) fn extract(
    input: &Path,
    samples_per_second: u32,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<WaveformEnvelope> {
    crate::ffmpeg_utils::init()?;
    let mut progress = ProgressTracker::new(sink, OperationTag::Waveform);

    let mut demuxer = Demuxer::open(input)?;
    demuxer.select_first_audio()?;

    let pcm_rate = demuxer.sample_rate()?.max(1);
    let channels = demuxer.channels()?.clamp(1, 2);
    let layout = if channels == 1 {
        ChannelLayout::MONO
    } else {
        ChannelLayout::STEREO
    };
    let duration_us = demuxer.duration_us()?;
    let bucket_size = (pcm_rate / samples_per_second.max(1)).max(1) as usize;

    let mut decoder = AudioDecoder::open(demuxer.parameters()?)?;
    let mut resampler: Option<Resampler> = None;
    let mut fold = BucketFold::new(bucket_size, channels as usize);
    let mut watchdog = Watchdog::new();
    let mut feed_done = false;

    loop {
        if cancel.is_cancelled() {
            return Err(AudioError::Cancelled);
        }
        let mut advanced = false;

        if !feed_done {
            match demuxer.next()? {
                Some(au) => {
                    watchdog.last_pts_us = au.pts_us;
                    decoder.send_packet(&au.packet)?;
                    advanced = true;
                    if duration_us > 0 {
                        progress.update(au.pts_us as f64 / duration_us as f64);
                    }
                }
                None => {
                    decoder.send_eof()?;
                    feed_done = true;
                    advanced = true;
                }
            }
        }

        match decoder.poll()? {
            DecoderPoll::Frame(frame) => {
                if resampler.is_none() {
                    resampler = Some(Resampler::from_frame(
                        &frame,
                        Sample::I16(Type::Packed),
                        layout,
                        pcm_rate,
                    )?);
                }
                let converted = resampler
                    .as_mut()
                    .expect("resampler created above")
                    .convert(&frame)?;
                for chunk in &converted {
                    fold_frame(&mut fold, chunk, channels as usize);
                }
                advanced = true;
            }
            DecoderPoll::NeedsInput => {}
            DecoderPoll::Finished => {
                if let Some(resampler) = resampler.as_mut() {
                    for chunk in resampler.flush()? {
                        fold_frame(&mut fold, &chunk, channels as usize);
                    }
                }
                break;
            }
        }

        watchdog.tick(advanced)?;
        if watchdog.idle_exhausted() {
            return Err(AudioError::PipelineStalled {
                context: "waveform decode made no progress".into(),
                last_pts_us: watchdog.last_pts_us,
            });
        }
    }

    let (amplitudes, total_frames) = fold.finish();
    // Prefer the decoded length; fall back to the container clock for
    // broken headers
    let decoded_ms = total_frames * 1000 / pcm_rate as u64;
    let duration_ms = if decoded_ms > 0 {
        decoded_ms
    } else {
        (duration_us.max(0) / 1000) as u64
    };

    progress.finish();
    Ok(WaveformEnvelope {
        amplitudes,
        sample_rate_hz: pcm_rate,
        duration_ms,
        channels,
    })
}

fn fold_frame(fold: &mut BucketFold, frame: &ffmpeg_next::util::frame::Audio, channels: usize) {
    let values = frame.samples() * channels;
    let bytes = helpers::audio_plane_data(frame, 0);
    if let Some(samples) = helpers::packed_plane_as_i16(bytes, values) {
        fold.push(samples);
    } else {
        tracing::warn!(samples = frame.samples(), "waveform: malformed S16 plane");
    }
}
