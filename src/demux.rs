//! Container demuxer.
//!
//! Opens an input container, enumerates its tracks, latches one audio
//! track and produces a lazy sequence of compressed access units with
//! presentation timestamps in microseconds. Timestamps always come from
//! the container's sample tables, never from a reconstructed clock.

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;

use crate::error::{AudioError, Result};
use crate::ffmpeg_utils::helpers;
use crate::types::{TrackFormat, TrackKind};

/// One compressed audio frame as produced by the demuxer.
///
/// Ownership moves across the interface: an `AccessUnit` is consumed by
/// the decoder or, on the lossless path, by the muxer.
pub(crate) struct AccessUnit {
    pub packet: ffmpeg::Packet,
    /// Presentation time in microseconds, from the container sample table
    pub pts_us: i64,
    /// Whether decoding may start at this AU without prior context
    pub is_sync: bool,
}

pub(crate) struct Demuxer {
    input: ffmpeg::format::context::Input,
    path: PathBuf,
    selected: Option<SelectedTrack>,
    /// One-AU pushback buffer so `seek_to_sync` can report its landing
    /// timestamp without losing the sample
    pending: Option<AccessUnit>,
}

impl std::fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demuxer").field("path", &self.path).finish()
    }
}

struct SelectedTrack {
    index: usize,
    time_base: ffmpeg::Rational,
    parameters: ffmpeg::codec::Parameters,
    duration_us: i64,
}

impl Demuxer {
    /// Open a container for reading.
    ///
    /// A missing or unreadable file is an `Io` error; a file FFmpeg cannot
    /// parse as a container is `UnsupportedFormat`. This is the only place
    /// `UnsupportedFormat` originates in the demuxer.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AudioError::io(path, "file not found"));
        }

        let input = ffmpeg::format::input(&path).map_err(|e| match e {
            ffmpeg::Error::InvalidData => {
                AudioError::unsupported(path, format!("container not recognized: {}", e))
            }
            other => AudioError::io(path, other),
        })?;

        tracing::debug!(
            path = %path.display(),
            container = input.format().name(),
            streams = input.streams().count(),
            "demuxer opened"
        );

        Ok(Self {
            input,
            path: path.to_path_buf(),
            selected: None,
            pending: None,
        })
    }

    /// Short name of the container format, e.g. "mp3" or "mov,mp4,m4a,3gp,3g2,mj2".
    pub(crate) fn container_name(&self) -> String {
        self.input.format().name().to_string()
    }

    /// Container-level metadata tags in file order.
    pub(crate) fn metadata(&self) -> Vec<(String, String)> {
        self.input
            .metadata()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// All tracks, in container order.
    pub(crate) fn tracks(&self) -> Vec<TrackFormat> {
        self.input
            .streams()
            .map(|stream| {
                let params = stream.parameters();
                let kind = match params.medium() {
                    ffmpeg::media::Type::Audio => TrackKind::Audio,
                    ffmpeg::media::Type::Video => TrackKind::Video,
                    ffmpeg::media::Type::Subtitle => TrackKind::Subtitle,
                    _ => TrackKind::Other,
                };
                let duration_us = if stream.duration() > 0 {
                    helpers::ts_to_micros(stream.duration(), stream.time_base())
                } else {
                    0
                };
                TrackFormat {
                    index: stream.index(),
                    kind,
                    codec: params.id().name().to_string(),
                    sample_rate: helpers::codec_params_sample_rate(&params),
                    channels: helpers::codec_params_channels(&params),
                    bit_rate_bps: helpers::codec_params_bit_rate(&params),
                    duration_us,
                    language: stream.metadata().get("language").map(|s| s.to_string()),
                }
            })
            .collect()
    }

    /// Latch the given track as the source for `next()`.
    pub(crate) fn select(&mut self, track_index: usize) -> Result<()> {
        let stream = self.input.stream(track_index).ok_or_else(|| {
            AudioError::unsupported(&self.path, format!("no track at index {}", track_index))
        })?;
        if stream.parameters().medium() != ffmpeg::media::Type::Audio {
            return Err(AudioError::unsupported(
                &self.path,
                format!("track {} is not audio", track_index),
            ));
        }
        let duration_us = if stream.duration() > 0 {
            helpers::ts_to_micros(stream.duration(), stream.time_base())
        } else {
            0
        };
        self.selected = Some(SelectedTrack {
            index: track_index,
            time_base: stream.time_base(),
            parameters: stream.parameters(),
            duration_us,
        });
        self.pending = None;
        Ok(())
    }

    /// Latch the first audio track. Errors when the container has none.
    pub(crate) fn select_first_audio(&mut self) -> Result<usize> {
        let index = self
            .input
            .streams()
            .find(|s| s.parameters().medium() == ffmpeg::media::Type::Audio)
            .map(|s| s.index())
            .ok_or_else(|| AudioError::unsupported(&self.path, "no audio track found"))?;
        self.select(index)?;
        Ok(index)
    }

    fn track(&self) -> Result<&SelectedTrack> {
        self.selected
            .as_ref()
            .ok_or_else(|| AudioError::unsupported(&self.path, "no track selected"))
    }

    /// Codec parameters of the selected track (includes codec-specific
    /// data such as the AAC AudioSpecificConfig).
    pub(crate) fn parameters(&self) -> Result<ffmpeg::codec::Parameters> {
        Ok(self.track()?.parameters.clone())
    }

    pub(crate) fn codec_id(&self) -> Result<ffmpeg::codec::Id> {
        Ok(self.track()?.parameters.id())
    }

    pub(crate) fn sample_rate(&self) -> Result<u32> {
        Ok(helpers::codec_params_sample_rate(&self.track()?.parameters))
    }

    pub(crate) fn channels(&self) -> Result<u16> {
        Ok(helpers::codec_params_channels(&self.track()?.parameters))
    }

    pub(crate) fn time_base(&self) -> Result<ffmpeg::Rational> {
        Ok(self.track()?.time_base)
    }

    /// Best-effort duration of the selected track in microseconds.
    ///
    /// Falls back from the track header to the container clock; 0 when
    /// neither is present.
    pub(crate) fn duration_us(&self) -> Result<i64> {
        let track = self.track()?;
        if track.duration_us > 0 {
            return Ok(track.duration_us);
        }
        let container = self.input.duration();
        Ok(if container > 0 { container } else { 0 })
    }

    /// Position the cursor at the nearest preceding sync sample and return
    /// the timestamp actually landed on.
    ///
    /// Containers without a sync-sample index land on the earliest sample
    /// at or after the target instead; for `time_us == 0` this degrades to
    /// a rewind.
    pub(crate) fn seek_to_sync(&mut self, time_us: i64) -> Result<i64> {
        let target = time_us.max(0);
        self.pending = None;
        self.input
            .seek(target, ..target)
            .map_err(|e| AudioError::io(&self.path, format!("seek to {}us failed: {}", target, e)))?;

        // The landing point is only known once the next sample is read;
        // buffer it so the caller does not lose it.
        match self.read_unit()? {
            Some(au) => {
                let landed = au.pts_us;
                self.pending = Some(au);
                tracing::debug!(target_us = target, landed_us = landed, "seek_to_sync");
                Ok(landed)
            }
            None => Ok(target),
        }
    }

    /// Produce the next access unit of the selected track, or `None` at
    /// end of stream. Read errors are fatal to the owning pipeline.
    pub(crate) fn next(&mut self) -> Result<Option<AccessUnit>> {
        if let Some(au) = self.pending.take() {
            return Ok(Some(au));
        }
        self.read_unit()
    }

    fn read_unit(&mut self) -> Result<Option<AccessUnit>> {
        let (index, time_base) = {
            let track = self.track()?;
            (track.index, track.time_base)
        };
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != index {
                        continue;
                    }
                    let raw_ts = packet.pts().or(packet.dts()).unwrap_or(0);
                    let pts_us = helpers::ts_to_micros(raw_ts, time_base);
                    let is_sync = packet.is_key();
                    return Ok(Some(AccessUnit {
                        packet,
                        pts_us,
                        is_sync,
                    }));
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => continue,
                Err(e) => {
                    return Err(AudioError::io(
                        &self.path,
                        format!("read failed mid-stream: {}", e),
                    ))
                }
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_is_io() {
        crate::ffmpeg_utils::init().unwrap();
        let err = Demuxer::open(Path::new("/nonexistent/audio.mp3")).unwrap_err();
        assert!(matches!(err, AudioError::Io { .. }));
    }

    #[test]
    fn test_open_garbage_is_unsupported() {
        crate::ffmpeg_utils::init().unwrap();
        let dir = std::env::temp_dir();
        let path = dir.join("audiopipe_demux_garbage_test.bin");
        std::fs::write(&path, b"this is definitely not a media container").unwrap();
        let result = Demuxer::open(&path);
        std::fs::remove_file(&path).ok();
        // Some FFmpeg builds probe this as raw data; either rejection kind
        // is acceptable, but it must not open with an audio track.
        match result {
            Err(AudioError::UnsupportedFormat { .. }) | Err(AudioError::Io { .. }) => {}
            Ok(mut demuxer) => {
                assert!(demuxer.select_first_audio().is_err());
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_select_out_of_range() {
        crate::ffmpeg_utils::init().unwrap();
        let dir = std::env::temp_dir();
        let path = dir.join("audiopipe_demux_select_test.wav");
        crate::test_wav::write_tone(&path, 8000, 1, 200).unwrap();
        let mut demuxer = Demuxer::open(&path).unwrap();
        assert!(demuxer.select(99).is_err());
        assert!(demuxer.select_first_audio().is_ok());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_wav_units_have_monotonic_timestamps() {
        crate::ffmpeg_utils::init().unwrap();
        let dir = std::env::temp_dir();
        let path = dir.join("audiopipe_demux_mono_test.wav");
        crate::test_wav::write_tone(&path, 8000, 1, 500).unwrap();
        let mut demuxer = Demuxer::open(&path).unwrap();
        demuxer.select_first_audio().unwrap();
        let mut last = i64::MIN;
        let mut count = 0;
        while let Some(au) = demuxer.next().unwrap() {
            assert!(au.pts_us >= last, "timestamps must be non-decreasing");
            last = au.pts_us;
            count += 1;
        }
        assert!(count > 0, "expected at least one access unit");
        std::fs::remove_file(&path).ok();
    }
}
