//! PCM sample FIFO.
//!
//! The AAC encoder demands exactly 1024 samples per channel per frame,
//! while decoders and the resampler hand back arbitrary chunk sizes.
//! This FIFO accumulates FLTP planes and pops exact-size frames; the
//! remainder carries over — across input files, on the splice path — and
//! the tail is zero-padded at flush so no PCM is ever dropped.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;

use crate::ffmpeg_utils::helpers;

use super::encoder::ENCODER_SAMPLE_FMT;

pub(crate) struct PcmFifo {
    planes: Vec<Vec<f32>>,
    rate: u32,
    layout: ChannelLayout,
}

impl PcmFifo {
    pub(crate) fn new(channels: u16, rate: u32, layout: ChannelLayout) -> Self {
        Self {
            planes: vec![Vec::new(); channels.max(1) as usize],
            rate,
            layout,
        }
    }

    /// Append one FLTP frame from the resampler.
    pub(crate) fn push(&mut self, frame: &ffmpeg::util::frame::Audio) {
        let n = frame.samples();
        if n == 0 {
            return;
        }
        for (ch, plane) in self.planes.iter_mut().enumerate() {
            let data = helpers::audio_plane_data(frame, ch);
            match helpers::fltp_plane_as_f32(data, n) {
                Some(floats) => plane.extend_from_slice(floats),
                None => {
                    // Misaligned or short plane; should not happen for
                    // frames we allocated, but never corrupt the stream
                    tracing::warn!(ch, samples = n, "fifo: dropping malformed plane");
                }
            }
        }
    }

    /// Samples per channel currently buffered.
    pub(crate) fn available(&self) -> usize {
        self.planes.first().map(|p| p.len()).unwrap_or(0)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Pop exactly `n` samples per channel, or `None` when fewer are
    /// buffered.
    pub(crate) fn pop_frame(&mut self, n: usize) -> Option<ffmpeg::util::frame::Audio> {
        if self.available() < n {
            return None;
        }
        Some(self.take(n, n))
    }

    /// Drain whatever remains (< `n` samples) as one final frame,
    /// zero-padded up to `n`. `None` when the FIFO is empty.
    pub(crate) fn pop_tail_padded(&mut self, n: usize) -> Option<ffmpeg::util::frame::Audio> {
        let remaining = self.available();
        if remaining == 0 {
            return None;
        }
        let take = remaining.min(n);
        Some(self.take(take, n))
    }

    fn take(&mut self, samples: usize, frame_len: usize) -> ffmpeg::util::frame::Audio {
        let mut out = ffmpeg::util::frame::Audio::new(ENCODER_SAMPLE_FMT, frame_len, self.layout);
        out.set_rate(self.rate);
        for (ch, plane) in self.planes.iter_mut().enumerate() {
            let dst_bytes = helpers::audio_plane_data_mut(&mut out, ch);
            if let Some(dst) = helpers::fltp_plane_as_f32_mut(dst_bytes, frame_len) {
                dst[..samples].copy_from_slice(&plane[..samples]);
                for value in dst[samples..].iter_mut() {
                    *value = 0.0;
                }
            }
            plane.drain(..samples);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::util::format::sample::{Sample, Type};

    fn fltp_frame(samples: usize, fill: f32) -> ffmpeg::util::frame::Audio {
        let mut frame = ffmpeg::util::frame::Audio::new(
            Sample::F32(Type::Planar),
            samples,
            ChannelLayout::STEREO,
        );
        frame.set_rate(44100);
        for ch in 0..2 {
            let bytes = helpers::audio_plane_data_mut(&mut frame, ch);
            let floats = helpers::fltp_plane_as_f32_mut(bytes, samples).unwrap();
            for f in floats.iter_mut() {
                *f = fill;
            }
        }
        frame
    }

    #[test]
    fn test_rechunks_uneven_input() {
        crate::ffmpeg_utils::init().unwrap();
        let mut fifo = PcmFifo::new(2, 44100, ChannelLayout::STEREO);

        // Opus-style 960-sample chunks into 1024-sample frames
        for _ in 0..4 {
            fifo.push(&fltp_frame(960, 0.25));
        }
        assert_eq!(fifo.available(), 3840);

        let mut popped = 0;
        while let Some(frame) = fifo.pop_frame(1024) {
            assert_eq!(frame.samples(), 1024);
            popped += 1024;
        }
        assert_eq!(popped, 3072);
        assert_eq!(fifo.available(), 768);
    }

    #[test]
    fn test_tail_is_zero_padded() {
        crate::ffmpeg_utils::init().unwrap();
        let mut fifo = PcmFifo::new(2, 44100, ChannelLayout::STEREO);
        fifo.push(&fltp_frame(100, 0.5));

        let tail = fifo.pop_tail_padded(1024).expect("tail frame");
        assert_eq!(tail.samples(), 1024);
        let bytes = helpers::audio_plane_data(&tail, 0);
        let floats = helpers::fltp_plane_as_f32(bytes, 1024).unwrap();
        assert!(floats[..100].iter().all(|&f| f == 0.5));
        assert!(floats[100..].iter().all(|&f| f == 0.0));
        assert!(fifo.is_empty());
        assert!(fifo.pop_tail_padded(1024).is_none());
    }

    #[test]
    fn test_no_samples_lost_across_pushes() {
        crate::ffmpeg_utils::init().unwrap();
        let mut fifo = PcmFifo::new(1, 8000, ChannelLayout::MONO);
        let mut pushed = 0usize;
        for n in [1, 7, 1023, 1024, 1025, 300] {
            fifo.push(&{
                let mut f = ffmpeg::util::frame::Audio::new(
                    Sample::F32(Type::Planar),
                    n,
                    ChannelLayout::MONO,
                );
                f.set_rate(8000);
                let bytes = helpers::audio_plane_data_mut(&mut f, 0);
                let floats = helpers::fltp_plane_as_f32_mut(bytes, n).unwrap();
                floats.fill(1.0);
                f
            });
            pushed += n;
        }
        let mut full = 0;
        while fifo.pop_frame(1024).is_some() {
            full += 1024;
        }
        let tail = fifo.available();
        assert_eq!(full + tail, pushed);
    }
}
