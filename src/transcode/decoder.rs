//! Audio decoder.
//!
//! Wraps an FFmpeg codec context to decode compressed access units (MP3,
//! AAC, PCM, Vorbis, …) into raw PCM frames. The poll result separates
//! "needs more input" from "fully drained" so the pipeline can propagate
//! end-of-stream precisely.

use ffmpeg_next as ffmpeg;

use crate::error::{FfmpegError, Result};

/// Outcome of one decoder output poll.
pub(crate) enum DecoderPoll {
    /// One decoded PCM frame, presentation timestamp preserved from the
    /// AU that produced it
    Frame(ffmpeg::util::frame::Audio),
    /// The decoder wants more compressed input before it can produce
    NeedsInput,
    /// EOS has propagated; no further frames will appear
    Finished,
}

pub(crate) struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
}

impl AudioDecoder {
    /// Open a decoder from the demuxer-reported codec parameters. No
    /// external configuration is needed; the parameters carry everything.
    pub(crate) fn open(params: ffmpeg::codec::Parameters) -> Result<Self> {
        let codec_name = params.id().name().to_string();
        let context = ffmpeg::codec::Context::from_parameters(params).map_err(|e| {
            FfmpegError::DecoderCreate(format!("context for {}: {}", codec_name, e))
        })?;

        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| FfmpegError::DecoderCreate(format!("open {}: {}", codec_name, e)))?;

        Ok(Self { decoder })
    }

    /// Send one compressed packet.
    ///
    /// `AVERROR_INVALIDDATA` is treated as non-fatal: decoders emit it for
    /// damaged frames and during seek pre-roll, and the stream recovers at
    /// the next sync sample.
    pub(crate) fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!("decoder: skipping invalid packet");
                Ok(())
            }
            Err(e) => Err(FfmpegError::DecodePacket(format!("send_packet: {}", e)).into()),
        }
    }

    /// Signal EOS so the decoder flushes its internal buffers.
    ///
    /// EAGAIN and EOF responses mean the decoder is already drained or has
    /// nothing buffered; neither is an error.
    pub(crate) fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(FfmpegError::DecodePacket(format!("send_eof: {}", e)).into()),
        }
    }

    /// Poll for one decoded frame.
    pub(crate) fn poll(&mut self) -> Result<DecoderPoll> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(DecoderPoll::Frame(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(DecoderPoll::NeedsInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(DecoderPoll::Finished),
            Err(e) => Err(FfmpegError::DecodePacket(format!("receive_frame: {}", e)).into()),
        }
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub(crate) fn channels(&self) -> u16 {
        self.decoder.channels()
    }
}
