//! AAC-LC encoder.
//!
//! Wraps an FFmpeg codec context to encode PCM frames (FLTP, mono or
//! stereo) into AAC access units. A full input queue is surfaced as
//! [`SendState::Full`] rather than an error so the pipeline can apply its
//! no-drop back-pressure rule.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::{Sample, Type};

use crate::error::{FfmpegError, Result};
use crate::ffmpeg_utils::helpers;
use crate::types::EncoderSettings;

/// Sample format the encoder expects from the resampler
pub(crate) const ENCODER_SAMPLE_FMT: Sample = Sample::F32(Type::Planar);
/// Samples per channel per AAC frame
pub(crate) const AAC_FRAME_SIZE: usize = 1024;

/// Encoder sample-rate window; input rates inside it are kept, rates
/// outside fall back to the caller-requested rate.
const ENCODER_RATE_MIN: u32 = 8000;
const ENCODER_RATE_MAX: u32 = 48000;

/// Fully resolved encoder parameters for one run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedEncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate_bps: u64,
}

impl ResolvedEncoderConfig {
    /// Apply the clamping rules to the input track's facts.
    ///
    /// Sample rate: the input rate when it lies in [8000, 48000], else the
    /// requested rate. Channels: input clamped to [1, 2], defaulting to 2
    /// when the container does not say. Bit rate: kbps × 1000.
    pub(crate) fn resolve(
        input_rate: u32,
        input_channels: u16,
        settings: &EncoderSettings,
    ) -> Self {
        let sample_rate = if (ENCODER_RATE_MIN..=ENCODER_RATE_MAX).contains(&input_rate) {
            input_rate
        } else {
            settings.sample_rate_hz
        };
        let channels = match input_channels {
            0 => 2,
            c => c.min(2),
        };
        Self {
            sample_rate,
            channels,
            bit_rate_bps: settings.bit_rate_kbps as u64 * 1000,
        }
    }

    pub(crate) fn channel_layout(&self) -> ChannelLayout {
        if self.channels == 1 {
            ChannelLayout::MONO
        } else {
            ChannelLayout::STEREO
        }
    }

    /// Duration of one encoded frame in microseconds.
    pub(crate) fn frame_duration_us(&self) -> i64 {
        AAC_FRAME_SIZE as i64 * 1_000_000 / self.sample_rate.max(1) as i64
    }
}

/// Result of trying to hand the encoder a PCM frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SendState {
    Accepted,
    /// Input queue full; drain output and retry
    Full,
}

/// Outcome of one encoder output poll.
pub(crate) enum EncoderPoll {
    Packet(ffmpeg::Packet),
    NeedsInput,
    /// EOS has propagated through; the encoder is fully flushed
    Finished,
}

pub(crate) struct AacEncoder {
    encoder: ffmpeg::encoder::Audio,
    frame_size: usize,
    time_base: ffmpeg::Rational,
    fallback_pts: i64,
}

impl AacEncoder {
    /// Open an AAC-LC encoder with the resolved parameters.
    pub(crate) fn open(config: &ResolvedEncoderConfig) -> Result<Self> {
        let codec = codec::encoder::find(codec::Id::AAC).ok_or_else(|| {
            FfmpegError::EncoderNotFound("AAC encoder not found in this FFmpeg build".into())
        })?;

        // Configure the audio encoder before opening
        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(ffmpeg::Rational::new(1, config.sample_rate as i32));

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            FfmpegError::EncoderConfigure(format!("cannot get audio encoder handle: {}", e))
        })?;

        audio_enc.set_rate(config.sample_rate as i32);
        audio_enc.set_format(ENCODER_SAMPLE_FMT);
        audio_enc.set_channel_layout(config.channel_layout());
        audio_enc.set_bit_rate(config.bit_rate_bps as usize);

        let encoder = audio_enc.open_as(codec).map_err(|e| {
            FfmpegError::EncoderConfigure(format!(
                "open AAC encoder ({}Hz, {}ch, {}bps): {}",
                config.sample_rate, config.channels, config.bit_rate_bps, e
            ))
        })?;

        let frame_size = encoder.frame_size() as usize;
        let time_base = ffmpeg::Rational::new(1, config.sample_rate as i32);

        Ok(Self {
            encoder,
            frame_size: if frame_size == 0 {
                AAC_FRAME_SIZE
            } else {
                frame_size
            },
            time_base,
            fallback_pts: 0,
        })
    }

    /// Try to hand one PCM frame to the encoder. EAGAIN means the input
    /// queue is full and maps to [`SendState::Full`]; the caller must not
    /// drop the frame.
    pub(crate) fn try_send_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<SendState> {
        match self.encoder.send_frame(frame) {
            Ok(()) => Ok(SendState::Accepted),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(SendState::Full)
            }
            Err(e) => Err(FfmpegError::EncodeFrame(format!("send_frame: {}", e)).into()),
        }
    }

    /// Signal EOS into the encoder so it flushes its buffered output.
    /// EAGAIN maps to `Full` (drain first); an already-flushed encoder is
    /// `Accepted`.
    pub(crate) fn try_send_eof(&mut self) -> Result<SendState> {
        match self.encoder.send_eof() {
            Ok(()) => Ok(SendState::Accepted),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(SendState::Full)
            }
            Err(ffmpeg::Error::Eof) => Ok(SendState::Accepted),
            Err(e) => Err(FfmpegError::EncodeFrame(format!("send_eof: {}", e)).into()),
        }
    }

    /// Poll for one encoded AU.
    pub(crate) fn poll(&mut self) -> Result<EncoderPoll> {
        let mut packet = ffmpeg::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                // Some encoder builds leave pts unset on flush packets
                if packet.pts().is_none() {
                    packet.set_pts(Some(self.fallback_pts));
                    packet.set_dts(Some(self.fallback_pts));
                }
                self.fallback_pts = packet.pts().unwrap_or(self.fallback_pts) + self.frame_size as i64;
                Ok(EncoderPoll::Packet(packet))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(EncoderPoll::NeedsInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(EncoderPoll::Finished),
            Err(e) => Err(FfmpegError::EncodeFrame(format!("receive_packet: {}", e)).into()),
        }
    }

    /// Samples per channel the encoder expects per input frame.
    pub(crate) fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Output timebase (1 / sample_rate).
    pub(crate) fn time_base(&self) -> ffmpeg::Rational {
        self.time_base
    }

    /// The output track format descriptor, for muxer registration.
    ///
    /// Valid once the encoder is open; includes the AudioSpecificConfig
    /// the MP4 muxer needs.
    pub(crate) fn codec_parameters(&self) -> ffmpeg::codec::Parameters {
        helpers::encoder_codec_parameters(&self.encoder)
    }
}

/// Whether the linked FFmpeg build includes an AAC encoder.
pub fn is_aac_encoder_available() -> bool {
    codec::encoder::find(codec::Id::AAC).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_keeps_in_window_input_rate() {
        let settings = EncoderSettings {
            bit_rate_kbps: 192,
            sample_rate_hz: 48000,
        };
        let config = ResolvedEncoderConfig::resolve(44100, 2, &settings);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.bit_rate_bps, 192_000);
    }

    #[test]
    fn test_resolve_falls_back_for_out_of_window_rate() {
        let settings = EncoderSettings {
            bit_rate_kbps: 128,
            sample_rate_hz: 44100,
        };
        let config = ResolvedEncoderConfig::resolve(96000, 2, &settings);
        assert_eq!(config.sample_rate, 44100);
    }

    #[test]
    fn test_resolve_clamps_channels() {
        let settings = EncoderSettings::default();
        assert_eq!(ResolvedEncoderConfig::resolve(44100, 6, &settings).channels, 2);
        assert_eq!(ResolvedEncoderConfig::resolve(44100, 0, &settings).channels, 2);
        assert_eq!(ResolvedEncoderConfig::resolve(44100, 1, &settings).channels, 1);
    }

    #[test]
    fn test_frame_duration() {
        let settings = EncoderSettings::default();
        let config = ResolvedEncoderConfig::resolve(8000, 1, &settings);
        assert_eq!(config.frame_duration_us(), 128_000);
    }

    #[test]
    fn test_encoder_opens() {
        crate::ffmpeg_utils::init().unwrap();
        if !is_aac_encoder_available() {
            return;
        }
        let config = ResolvedEncoderConfig::resolve(44100, 2, &EncoderSettings::default());
        let encoder = AacEncoder::open(&config);
        assert!(encoder.is_ok(), "AAC encoder should open: {:?}", encoder.err());
        let encoder = encoder.unwrap();
        assert_eq!(encoder.time_base(), ffmpeg::Rational::new(1, 44100));
        assert!(encoder.frame_size() > 0);
    }

    #[test]
    fn test_encoder_accepts_silence_frames() {
        crate::ffmpeg_utils::init().unwrap();
        if !is_aac_encoder_available() {
            return;
        }
        let config = ResolvedEncoderConfig::resolve(44100, 2, &EncoderSettings::default());
        let mut encoder = AacEncoder::open(&config).unwrap();

        let mut frame = ffmpeg::util::frame::Audio::new(
            ENCODER_SAMPLE_FMT,
            encoder.frame_size(),
            ChannelLayout::STEREO,
        );
        frame.set_rate(44100);
        for ch in 0..2 {
            let data = crate::ffmpeg_utils::helpers::audio_plane_data_mut(&mut frame, ch);
            for b in data.iter_mut() {
                *b = 0;
            }
        }

        let mut produced = 0;
        for i in 0..5 {
            frame.set_pts(Some(i * encoder.frame_size() as i64));
            assert_eq!(encoder.try_send_frame(&frame).unwrap(), SendState::Accepted);
            while let EncoderPoll::Packet(_) = encoder.poll().unwrap() {
                produced += 1;
            }
        }
        assert_eq!(encoder.try_send_eof().unwrap(), SendState::Accepted);
        loop {
            match encoder.poll().unwrap() {
                EncoderPoll::Packet(pkt) => {
                    assert!(pkt.pts().is_some());
                    produced += 1;
                }
                EncoderPoll::Finished => break,
                EncoderPoll::NeedsInput => break,
            }
        }
        assert!(produced >= 5, "expected the encoder to flush all frames");
    }
}
