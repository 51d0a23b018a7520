#![allow(dead_code)]

//! PCM sample-layout converter.
//!
//! Wraps FFmpeg's `SwrContext`. The transcode path converts decoded
//! frames to FLTP at the encoder rate; the waveform reducer converts to
//! packed S16 at the source rate. Both construct the resampler lazily
//! from the first decoded frame, since decoders only commit to an output
//! layout once they produce.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{FfmpegError, Result};

pub(crate) struct Resampler {
    context: resampling::Context,
    output_rate: u32,
}

impl Resampler {
    /// Create a converter from the layout of `src_frame` to the given
    /// destination format/layout/rate.
    pub(crate) fn from_frame(
        src_frame: &ffmpeg::util::frame::Audio,
        dst_format: Sample,
        dst_layout: ChannelLayout,
        dst_rate: u32,
    ) -> Result<Self> {
        let src_layout = if src_frame.channel_layout().bits() == 0 {
            // No layout tagged on the frame; derive one from the count
            match src_frame.channels() {
                1 => ChannelLayout::MONO,
                _ => ChannelLayout::STEREO,
            }
        } else {
            src_frame.channel_layout()
        };

        let context = resampling::Context::get(
            src_frame.format(),
            src_layout,
            src_frame.rate(),
            dst_format,
            dst_layout,
            dst_rate,
        )
        .map_err(|e| {
            FfmpegError::ResamplerCreate(format!(
                "{}Hz {:?} -> {}Hz: {}",
                src_frame.rate(),
                src_frame.format(),
                dst_rate,
                e
            ))
        })?;

        Ok(Self {
            context,
            output_rate: dst_rate,
        })
    }

    /// Convert one input frame into zero or more output frames.
    ///
    /// An empty result means the resampler buffered everything and needs
    /// more input, which happens around stream edges with uneven rates.
    pub(crate) fn convert(
        &mut self,
        frame: &ffmpeg::util::frame::Audio,
    ) -> Result<Vec<ffmpeg::util::frame::Audio>> {
        // The output frame must be empty: swr_convert_frame sizes the
        // buffer from the context configuration. Pre-populated frames make
        // the resampler read them as source data.
        let mut out = ffmpeg::util::frame::Audio::empty();

        self.context
            .run(frame, &mut out)
            .map_err(|e| FfmpegError::ResampleFrame(format!("convert: {}", e)))?;

        if out.samples() == 0 {
            return Ok(vec![]);
        }

        Ok(vec![out])
    }

    /// Flush delayed samples from the internal buffer.
    ///
    /// A pass-through context (same rate both sides) has nothing buffered
    /// and reports an error here; that is not a failure.
    pub(crate) fn flush(&mut self) -> Result<Vec<ffmpeg::util::frame::Audio>> {
        let mut out = ffmpeg::util::frame::Audio::empty();
        match self.context.flush(&mut out) {
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("resampler flush returned non-fatal error: {}", e);
                return Ok(vec![]);
            }
        }

        if out.samples() == 0 {
            return Ok(vec![]);
        }

        Ok(vec![out])
    }

    pub(crate) fn output_rate(&self) -> u32 {
        self.output_rate
    }
}
