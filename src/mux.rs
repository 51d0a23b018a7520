//! MP4/M4A muxer.
//!
//! Writes a compressed AU stream into an MP4 (ISO BMFF) container on
//! disk. The lifecycle is a strict state machine: `Created → TrackAdded →
//! Started → Stopped`; writing a sample in any state but `Started` is a
//! pipeline bug and reported as [`AudioError::Muxer`].

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;

use crate::error::{AudioError, Result};
use crate::ffmpeg_utils::helpers;

/// Samples per AAC frame; used to derive the per-track jitter tolerance.
const AAC_FRAME_SAMPLES: i64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Created,
    TrackAdded,
    Started,
    Stopped,
}

struct TrackState {
    last_pts_us: Option<i64>,
    /// Container timestamps may wobble by up to one frame duration
    jitter_tolerance_us: i64,
    samples_written: u64,
}

pub(crate) struct Mp4Muxer {
    output: ffmpeg::format::context::Output,
    path: PathBuf,
    state: MuxerState,
    tracks: Vec<TrackState>,
}

impl Mp4Muxer {
    /// Create the output container at `path`. The file exists (empty)
    /// from this point on; the header is only committed by [`start`].
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let output = ffmpeg::format::output_as(&path, "mp4")
            .map_err(|e| AudioError::Muxer(format!("create {}: {}", path.display(), e)))?;

        Ok(Self {
            output,
            path: path.to_path_buf(),
            state: MuxerState::Created,
            tracks: Vec::new(),
        })
    }

    /// Register an audio track from codec parameters and return its id.
    ///
    /// `sample_rate` fixes the track timebase at `1/sample_rate`. More
    /// than one track is accepted for future extension, but the current
    /// pipelines only ever add one.
    pub(crate) fn add_track(
        &mut self,
        params: &ffmpeg::codec::Parameters,
        sample_rate: u32,
    ) -> Result<usize> {
        if !matches!(self.state, MuxerState::Created | MuxerState::TrackAdded) {
            return Err(AudioError::Muxer(format!(
                "add_track in state {:?}",
                self.state
            )));
        }

        let mut out_stream = self
            .output
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| AudioError::Muxer(format!("add_stream: {}", e)))?;

        out_stream.set_parameters(params.clone());
        // The source container's tag is rarely valid for mp4; let the
        // muxer pick its own.
        helpers::stream_reset_codec_tag(&mut out_stream);

        let rate = sample_rate.max(1) as i32;
        out_stream.set_time_base(ffmpeg::Rational::new(1, rate));

        let track_id = out_stream.index();
        self.tracks.push(TrackState {
            last_pts_us: None,
            jitter_tolerance_us: AAC_FRAME_SAMPLES * 1_000_000 / rate as i64,
            samples_written: 0,
        });
        self.state = MuxerState::TrackAdded;

        tracing::debug!(
            track_id,
            sample_rate,
            codec = params.id().name(),
            has_csd = helpers::codec_params_has_extradata(params),
            "muxer track added"
        );

        Ok(track_id)
    }

    /// Commit the container header. Only valid once a track exists.
    pub(crate) fn start(&mut self) -> Result<()> {
        if self.state != MuxerState::TrackAdded {
            return Err(AudioError::Muxer(format!("start in state {:?}", self.state)));
        }

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("movflags", "+faststart");
        self.output
            .write_header_with(opts)
            .map_err(|e| AudioError::Muxer(format!("write_header: {}", e)))?;

        self.state = MuxerState::Started;
        Ok(())
    }

    /// Write one compressed AU whose timestamps are in `src_tb`.
    ///
    /// Enforces non-decreasing presentation times per track (within the
    /// one-frame jitter tolerance) before handing the packet to the
    /// container.
    pub(crate) fn write_sample(
        &mut self,
        track_id: usize,
        packet: &mut ffmpeg::Packet,
        src_tb: ffmpeg::Rational,
    ) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(AudioError::Muxer(format!(
                "write_sample in state {:?}",
                self.state
            )));
        }
        let track = self
            .tracks
            .get_mut(track_id)
            .ok_or_else(|| AudioError::Muxer(format!("unknown track {}", track_id)))?;

        let pts_us = packet
            .pts()
            .or(packet.dts())
            .map(|ts| helpers::ts_to_micros(ts, src_tb))
            .unwrap_or(0);

        if let Some(last) = track.last_pts_us {
            if pts_us < last - track.jitter_tolerance_us {
                return Err(AudioError::Muxer(format!(
                    "non-monotonic timestamp on track {}: {}us after {}us",
                    track_id, pts_us, last
                )));
            }
        }

        let out_tb = self
            .output
            .stream(track_id)
            .map(|s| s.time_base())
            .ok_or_else(|| AudioError::Muxer(format!("missing stream {}", track_id)))?;

        packet.set_stream(track_id);
        packet.set_position(-1);
        packet.rescale_ts(src_tb, out_tb);

        packet
            .write_interleaved(&mut self.output)
            .map_err(|e| AudioError::Muxer(format!("write_sample: {}", e)))?;

        track.last_pts_us = Some(pts_us.max(track.last_pts_us.unwrap_or(i64::MIN)));
        track.samples_written += 1;
        Ok(())
    }

    /// Finalize the moov/index. Idempotent once stopped.
    pub(crate) fn stop(&mut self) -> Result<()> {
        match self.state {
            MuxerState::Started => {
                self.output
                    .write_trailer()
                    .map_err(|e| AudioError::Muxer(format!("write_trailer: {}", e)))?;
                self.state = MuxerState::Stopped;
                Ok(())
            }
            MuxerState::Stopped => Ok(()),
            other => Err(AudioError::Muxer(format!("stop in state {:?}", other))),
        }
    }

    /// Best-effort teardown on error paths. Never fails; a failed trailer
    /// write is logged and swallowed, matching the "already stopped is
    /// expected" cleanup contract.
    pub(crate) fn close(&mut self) {
        if self.state == MuxerState::Started {
            if let Err(e) = self.output.write_trailer() {
                tracing::debug!("muxer close: trailer write failed (ignored): {}", e);
            }
            self.state = MuxerState::Stopped;
        }
    }

    /// Highest presentation time written to the track, in microseconds.
    pub(crate) fn last_pts_us(&self, track_id: usize) -> Option<i64> {
        self.tracks.get(track_id).and_then(|t| t.last_pts_us)
    }

    pub(crate) fn samples_written(&self, track_id: usize) -> u64 {
        self.tracks.get(track_id).map(|t| t.samples_written).unwrap_or(0)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
