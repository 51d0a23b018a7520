//! The transcode pipeline.
//!
//! A single-threaded cooperative loop wiring demuxer → decoder →
//! resampler → FIFO → encoder → muxer. Each iteration runs five short
//! phases (feed, pump, late-EOS, drain, watchdog) so back-pressure from
//! any one stage yields to the others instead of blocking. PCM is never
//! dropped: a full encoder queue triggers an output drain and a bounded
//! retry before the run fails with `PipelineStalled`.

use std::path::Path;
use std::time::{Duration, Instant};

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::demux::Demuxer;
use crate::error::{AudioError, Result};
use crate::mux::Mp4Muxer;
use crate::progress::{CancelToken, OperationTag, ProgressSink, ProgressTracker};
use crate::range::{GateDecision, RangeGate};
use crate::types::{ConversionResult, EncoderSettings, TimeRange};

use super::decoder::{AudioDecoder, DecoderPoll};
use super::encoder::{AacEncoder, EncoderPoll, ResolvedEncoderConfig, SendState, ENCODER_SAMPLE_FMT};
use super::pcm_fifo::PcmFifo;
use super::resampler::Resampler;

/// Pause when no stage advanced in an iteration.
const POLL_BACKOFF: Duration = Duration::from_millis(1);
/// Attempts to place a PCM frame into a full encoder before giving up.
const BACKPRESSURE_RETRY_LIMIT: usize = 10;
/// Pause between back-pressure retries; longer than the poll backoff so
/// the encoder gets real time to drain.
const BACKPRESSURE_BACKOFF: Duration = Duration::from_millis(5);
/// Iterations with no progress before the watchdog intervenes.
const IDLE_WATCHDOG_THRESHOLD: u64 = 1_000;
/// Hard caps; exceeding either is a fatal `Timeout`.
const MAX_ITERATIONS: u64 = 50_000;
const MAX_WALL_CLOCK: Duration = Duration::from_secs(120);

/// Per-run iteration bookkeeping and hard caps.
pub(crate) struct Watchdog {
    started: Instant,
    iterations: u64,
    idle: u64,
    /// Last rebased presentation time seen by the feed phase; error context
    pub(crate) last_pts_us: i64,
}

impl Watchdog {
    pub(crate) fn new() -> Self {
        Self {
            started: Instant::now(),
            iterations: 0,
            idle: 0,
            last_pts_us: 0,
        }
    }

    /// Account for one loop iteration. Errors on the hard caps; sleeps
    /// briefly when nothing advanced so idle loops do not spin hot.
    pub(crate) fn tick(&mut self, advanced: bool) -> Result<()> {
        self.iterations += 1;
        if advanced {
            self.idle = 0;
        } else {
            self.idle += 1;
            std::thread::sleep(POLL_BACKOFF);
        }
        if self.iterations > MAX_ITERATIONS || self.started.elapsed() > MAX_WALL_CLOCK {
            return Err(AudioError::Timeout {
                elapsed_secs: self.started.elapsed().as_secs(),
                iterations: self.iterations,
                last_pts_us: self.last_pts_us,
            });
        }
        Ok(())
    }

    pub(crate) fn idle_exhausted(&self) -> bool {
        self.idle >= IDLE_WATCHDOG_THRESHOLD
    }

    fn stalled(&self, context: &str) -> AudioError {
        AudioError::PipelineStalled {
            context: context.to_string(),
            last_pts_us: self.last_pts_us,
        }
    }
}

/// The encoder side of the pipeline: FIFO, AAC encoder, output clock and
/// the once-only muxer track registration.
///
/// One `EncoderStage` spans a whole operation. The splice orchestrator
/// runs several inputs through a single stage; the monotonic output
/// sample counter (`next_pts`) then carries the cumulative timestamp
/// offset across input boundaries for free.
pub(crate) struct EncoderStage {
    config: ResolvedEncoderConfig,
    encoder: AacEncoder,
    fifo: PcmFifo,
    /// Output clock in samples; the pts of the next frame handed to the
    /// encoder
    next_pts: i64,
    /// Real (unpadded) samples accepted from the resampler
    accepted_samples: i64,
    track: Option<usize>,
    eos_signaled: bool,
    finished: bool,
}

impl EncoderStage {
    pub(crate) fn new(config: ResolvedEncoderConfig) -> Result<Self> {
        let encoder = AacEncoder::open(&config)?;
        let fifo = PcmFifo::new(config.channels, config.sample_rate, config.channel_layout());
        Ok(Self {
            config,
            encoder,
            fifo,
            next_pts: 0,
            accepted_samples: 0,
            track: None,
            eos_signaled: false,
            finished: false,
        })
    }

    /// Target layout the resampler must produce for this stage.
    pub(crate) fn resample_target(&self) -> (Sample, ChannelLayout, u32) {
        (
            ENCODER_SAMPLE_FMT,
            self.config.channel_layout(),
            self.config.sample_rate,
        )
    }

    /// Buffer resampled PCM and move every full frame into the encoder.
    pub(crate) fn accept(
        &mut self,
        frames: Vec<ffmpeg::util::frame::Audio>,
        muxer: &mut Mp4Muxer,
        watchdog: &mut Watchdog,
    ) -> Result<bool> {
        let mut advanced = false;
        for frame in &frames {
            self.accepted_samples += frame.samples() as i64;
            self.fifo.push(frame);
            advanced = true;
        }
        while let Some(mut frame) = self.fifo.pop_frame(self.encoder.frame_size()) {
            self.submit(&mut frame, muxer, watchdog)?;
            advanced = true;
        }
        Ok(advanced)
    }

    /// Hand one exact-size frame to the encoder, honoring the no-drop
    /// back-pressure rule: on a full input queue, drain one output buffer
    /// and retry with a longer pause, up to the retry budget.
    fn submit(
        &mut self,
        frame: &mut ffmpeg::util::frame::Audio,
        muxer: &mut Mp4Muxer,
        watchdog: &mut Watchdog,
    ) -> Result<()> {
        frame.set_pts(Some(self.next_pts));
        let samples = frame.samples() as i64;

        if self.encoder.try_send_frame(frame)? == SendState::Accepted {
            self.next_pts += samples;
            return Ok(());
        }
        for _ in 0..BACKPRESSURE_RETRY_LIMIT {
            self.pump_once(muxer)?;
            std::thread::sleep(BACKPRESSURE_BACKOFF);
            if self.encoder.try_send_frame(frame)? == SendState::Accepted {
                self.next_pts += samples;
                return Ok(());
            }
        }
        Err(watchdog.stalled("encoder input queue stayed full"))
    }

    /// Drain all output the encoder currently has. Returns whether
    /// anything moved.
    pub(crate) fn pump(&mut self, muxer: &mut Mp4Muxer) -> Result<bool> {
        let mut advanced = false;
        while !self.finished {
            match self.encoder.poll()? {
                EncoderPoll::Packet(packet) => {
                    self.write(packet, muxer)?;
                    advanced = true;
                }
                EncoderPoll::NeedsInput => break,
                EncoderPoll::Finished => {
                    self.finished = true;
                }
            }
        }
        Ok(advanced)
    }

    /// Drain at most one output buffer, to relieve back-pressure.
    fn pump_once(&mut self, muxer: &mut Mp4Muxer) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        match self.encoder.poll()? {
            EncoderPoll::Packet(packet) => {
                self.write(packet, muxer)?;
                Ok(true)
            }
            EncoderPoll::NeedsInput => Ok(false),
            EncoderPoll::Finished => {
                self.finished = true;
                Ok(false)
            }
        }
    }

    fn write(&mut self, mut packet: ffmpeg::Packet, muxer: &mut Mp4Muxer) -> Result<()> {
        // The first output carries the encoder's real output format;
        // register the muxer track now and never again.
        if self.track.is_none() {
            let params = self.encoder.codec_parameters();
            let track_id = muxer.add_track(&params, self.config.sample_rate)?;
            muxer.start()?;
            self.track = Some(track_id);
            tracing::debug!(track_id, "output format registered, muxer started");
        }
        let track_id = self.track.expect("track registered above");
        if packet.duration() == 0 {
            packet.set_duration(self.encoder.frame_size() as i64);
        }
        muxer.write_sample(track_id, &mut packet, self.encoder.time_base())
    }

    /// Flush the FIFO tail (zero-padded) and signal EOS into the encoder.
    pub(crate) fn signal_eos(&mut self, muxer: &mut Mp4Muxer, watchdog: &mut Watchdog) -> Result<()> {
        if self.eos_signaled {
            return Ok(());
        }
        if let Some(mut tail) = self.fifo.pop_tail_padded(self.encoder.frame_size()) {
            self.submit(&mut tail, muxer, watchdog)?;
        }
        if self.encoder.try_send_eof()? == SendState::Full {
            let mut accepted = false;
            for _ in 0..BACKPRESSURE_RETRY_LIMIT {
                self.pump_once(muxer)?;
                std::thread::sleep(BACKPRESSURE_BACKOFF);
                if self.encoder.try_send_eof()? == SendState::Accepted {
                    accepted = true;
                    break;
                }
            }
            if !accepted {
                return Err(watchdog.stalled("encoder refused EOS"));
            }
        }
        self.eos_signaled = true;
        Ok(())
    }

    /// Signal EOS (if not yet) and drain until the encoder reports
    /// finished. The idle watchdog closes the "output done but state
    /// machine stuck" gap by assuming silent completion after EOS.
    pub(crate) fn finish(&mut self, muxer: &mut Mp4Muxer, watchdog: &mut Watchdog) -> Result<()> {
        self.signal_eos(muxer, watchdog)?;
        while !self.finished {
            let advanced = self.pump(muxer)?;
            if self.finished {
                break;
            }
            watchdog.tick(advanced)?;
            if watchdog.idle_exhausted() {
                tracing::warn!("encoder went silent after EOS; assuming complete");
                break;
            }
        }
        Ok(())
    }

    /// Duration of the real (unpadded) PCM accepted so far.
    pub(crate) fn accepted_duration_ms(&self) -> u64 {
        (self.accepted_samples.max(0) as u64 * 1000) / self.config.sample_rate.max(1) as u64
    }
}

/// Run one input through the decoder into the shared encoder stage until
/// the decoder is fully drained. Does NOT signal EOS to the encoder; the
/// caller decides (immediately for convert/trim, after the last file for
/// splice).
pub(crate) fn run_input(
    demuxer: &mut Demuxer,
    decoder: &mut AudioDecoder,
    gate: &mut RangeGate,
    stage: &mut EncoderStage,
    muxer: &mut Mp4Muxer,
    watchdog: &mut Watchdog,
    progress: &mut ProgressTracker<'_>,
    cancel: &CancelToken,
    expected_us: i64,
) -> Result<()> {
    let mut resampler: Option<Resampler> = None;
    // EOS has been queued into the decoder (input exhausted or range closed)
    let mut feed_done = false;
    let mut last_seen_us = 0i64;

    loop {
        if cancel.is_cancelled() {
            return Err(AudioError::Cancelled);
        }
        let mut advanced = false;

        // Phase 1: feed the decoder
        if !feed_done {
            match demuxer.next()? {
                Some(au) => match gate.admit(au) {
                    GateDecision::Feed { au, rebased_us } => {
                        last_seen_us = au.pts_us;
                        watchdog.last_pts_us = rebased_us;
                        decoder.send_packet(&au.packet)?;
                        advanced = true;
                    }
                    GateDecision::Skip => {
                        // Before the range start: advance without queueing
                        advanced = true;
                    }
                    GateDecision::End => {
                        decoder.send_eof()?;
                        feed_done = true;
                        advanced = true;
                    }
                },
                None => {
                    decoder.send_eof()?;
                    feed_done = true;
                    advanced = true;
                }
            }
            if expected_us > 0 && last_seen_us > 0 {
                progress.update(gate.processed_us(last_seen_us) as f64 / expected_us as f64);
            }
        }

        // Phase 2: pump decoder → resampler → FIFO → encoder
        match decoder.poll()? {
            DecoderPoll::Frame(frame) => {
                if resampler.is_none() {
                    let (format, layout, rate) = stage.resample_target();
                    tracing::debug!(
                        src_rate = frame.rate(),
                        src_channels = frame.channels(),
                        dst_rate = rate,
                        "creating resampler from first decoded frame"
                    );
                    resampler = Some(Resampler::from_frame(&frame, format, layout, rate)?);
                }
                let converted = resampler
                    .as_mut()
                    .expect("resampler created above")
                    .convert(&frame)?;
                stage.accept(converted, muxer, watchdog)?;
                advanced = true;
            }
            DecoderPoll::NeedsInput => {}
            DecoderPoll::Finished => {
                // Decoder drained; recover the resampler remainder, then
                // this input is complete.
                if let Some(resampler) = resampler.as_mut() {
                    let tail = resampler.flush()?;
                    stage.accept(tail, muxer, watchdog)?;
                }
                return Ok(());
            }
        }

        // Phase 4: drain encoder → muxer
        if stage.pump(muxer)? {
            advanced = true;
        }

        // Phase 5: watchdog
        watchdog.tick(advanced)?;
        if watchdog.idle_exhausted() {
            if feed_done {
                // Input is exhausted but the decoder never reported EOS;
                // re-signal once, then fail if still wedged.
                decoder.send_eof()?;
            }
            return Err(watchdog.stalled("no pipeline stage advanced"));
        }
    }
}

/// Transcode one file into M4A/AAC, optionally restricted to a time range.
pub(crate) fn transcode_file(
    input: &Path,
    output: &Path,
    range: Option<TimeRange>,
    settings: &EncoderSettings,
    tag: OperationTag,
    sink: &mut dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ConversionResult> {
    crate::ffmpeg_utils::init()?;
    let mut progress = ProgressTracker::new(sink, tag);

    match run_single(input, output, range, settings, cancel, &mut progress) {
        Ok(result) => {
            verify_output(output)?;
            progress.finish();
            Ok(result)
        }
        Err(AudioError::Cancelled) => {
            // Partial outputs are only removed on cancellation; other
            // failures leave the partial file for the caller to inspect.
            std::fs::remove_file(output).ok();
            Err(AudioError::Cancelled)
        }
        Err(e) => Err(e),
    }
}

fn run_single(
    input: &Path,
    output: &Path,
    range: Option<TimeRange>,
    settings: &EncoderSettings,
    cancel: &CancelToken,
    progress: &mut ProgressTracker<'_>,
) -> Result<ConversionResult> {
    let mut demuxer = Demuxer::open(input)?;
    demuxer.select_first_audio()?;

    let config =
        ResolvedEncoderConfig::resolve(demuxer.sample_rate()?, demuxer.channels()?, settings);
    let duration_us = demuxer.duration_us()?;

    let mut decoder = AudioDecoder::open(demuxer.parameters()?)?;
    let mut stage = EncoderStage::new(config)?;
    let mut muxer = Mp4Muxer::create(output)?;
    let mut gate = RangeGate::new(range);
    gate.prime(&mut demuxer)?;
    let expected_us = gate.expected_duration_us(duration_us);
    let mut watchdog = Watchdog::new();

    let mut run = run_input(
        &mut demuxer,
        &mut decoder,
        &mut gate,
        &mut stage,
        &mut muxer,
        &mut watchdog,
        progress,
        cancel,
        expected_us,
    );
    if run.is_ok() {
        run = stage.finish(&mut muxer, &mut watchdog);
    }
    if run.is_ok() {
        run = muxer.stop();
    }

    if let Err(e) = run {
        // Cleanup runs on every exit path: trailer if the header went out,
        // then codecs and the demuxer release on drop.
        muxer.close();
        return Err(e);
    }

    Ok(ConversionResult {
        output_path: output.to_path_buf(),
        duration_ms: stage.accepted_duration_ms(),
        bit_rate_kbps: settings.bit_rate_kbps,
        sample_rate_hz: config.sample_rate,
        files_processed: 1,
    })
}

/// Post-condition: the output file must exist and be non-empty, whatever
/// the pipeline believed about its own success.
pub(crate) fn verify_output(output: &Path) -> Result<()> {
    match std::fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(AudioError::io(output, "output file is empty")),
        Err(e) => Err(AudioError::io(output, format!("output missing: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    #[test]
    fn test_watchdog_iteration_cap() {
        let mut watchdog = Watchdog::new();
        let mut result = Ok(());
        for _ in 0..=MAX_ITERATIONS {
            result = watchdog.tick(true);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(AudioError::Timeout { .. })));
    }

    #[test]
    fn test_watchdog_idle_counter_resets_on_progress() {
        let mut watchdog = Watchdog::new();
        for _ in 0..10 {
            watchdog.tick(false).unwrap();
        }
        assert!(!watchdog.idle_exhausted());
        watchdog.tick(true).unwrap();
        assert_eq!(watchdog.idle, 0);
    }

    #[test]
    fn test_transcode_wav_fixture() {
        crate::ffmpeg_utils::init().unwrap();
        if !super::super::encoder::is_aac_encoder_available() {
            return;
        }
        let dir = std::env::temp_dir();
        let input = dir.join("audiopipe_pipeline_test_in.wav");
        let output = dir.join("audiopipe_pipeline_test_out.m4a");
        crate::test_wav::write_tone(&input, 44100, 2, 1000).unwrap();

        let result = transcode_file(
            &input,
            &output,
            None,
            &EncoderSettings::default(),
            OperationTag::Convert,
            &mut NoProgress,
            &CancelToken::new(),
        )
        .unwrap();

        assert!(result.duration_ms >= 980 && result.duration_ms <= 1020);
        assert_eq!(result.sample_rate_hz, 44100);
        assert!(std::fs::metadata(&output).unwrap().len() > 0);

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_pre_set_cancel_removes_output() {
        crate::ffmpeg_utils::init().unwrap();
        if !super::super::encoder::is_aac_encoder_available() {
            return;
        }
        let dir = std::env::temp_dir();
        let input = dir.join("audiopipe_pipeline_cancel_in.wav");
        let output = dir.join("audiopipe_pipeline_cancel_out.m4a");
        crate::test_wav::write_tone(&input, 44100, 2, 500).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = transcode_file(
            &input,
            &output,
            None,
            &EncoderSettings::default(),
            OperationTag::Convert,
            &mut NoProgress,
            &cancel,
        )
        .unwrap_err();

        assert!(matches!(err, AudioError::Cancelled));
        assert!(!output.exists(), "partial output must be removed");
        std::fs::remove_file(&input).ok();
    }
}
