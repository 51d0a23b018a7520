//! Progress reporting and cancellation plumbing.
//!
//! Progress is delivered through a caller-owned [`ProgressSink`]; the
//! pipeline only invokes it. Within one operation the reported values are
//! strictly non-decreasing, stay below 1.0 while streaming, and end with
//! exactly one 1.0 after the output file has been verified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which public operation a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationTag {
    Convert,
    Trim,
    TrimLossless,
    Splice,
    Waveform,
}

impl OperationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationTag::Convert => "convert",
            OperationTag::Trim => "trim",
            OperationTag::TrimLossless => "trim_lossless",
            OperationTag::Splice => "splice",
            OperationTag::Waveform => "waveform",
        }
    }
}

/// One progress event, `progress` in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub op: OperationTag,
    pub progress: f64,
}

/// Trait used to relay progress while an operation runs.
///
/// The default implementation ignores everything, so callers that do not
/// care can pass [`NoProgress`].
pub trait ProgressSink {
    fn report(&mut self, _update: ProgressUpdate) {}
}

/// A sink that discards all progress events.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Adapter so a plain closure can act as a sink:
/// `&mut FnProgress(|u| println!("{:?}", u))`.
pub struct FnProgress<F: FnMut(ProgressUpdate)>(pub F);

impl<F: FnMut(ProgressUpdate)> ProgressSink for FnProgress<F> {
    fn report(&mut self, update: ProgressUpdate) {
        (self.0)(update)
    }
}

/// Cooperative cancellation signal shared between the caller and a running
/// operation. The pipeline checks it once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Streaming-phase progress ceiling. The last 5% is reserved for muxer
/// finalization and output verification.
const STREAMING_CEILING: f64 = 0.95;

/// Internal wrapper enforcing the progress contract: clamped, monotonic,
/// one final 1.0.
pub(crate) struct ProgressTracker<'a> {
    sink: &'a mut dyn ProgressSink,
    op: OperationTag,
    last: f64,
    finished: bool,
    /// Window mapping for sub-operations (splice): raw progress p is
    /// reported as `base + p * scale`.
    base: f64,
    scale: f64,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink, op: OperationTag) -> Self {
        Self {
            sink,
            op,
            last: 0.0,
            finished: false,
            base: 0.0,
            scale: 1.0,
        }
    }

    /// Restrict subsequent updates to the window `[base, base + scale]`.
    pub(crate) fn set_window(&mut self, base: f64, scale: f64) {
        self.base = base;
        self.scale = scale;
    }

    /// Report streaming progress. Values are clamped to the streaming
    /// ceiling and never move backwards.
    pub(crate) fn update(&mut self, raw: f64) {
        if self.finished {
            return;
        }
        let windowed = self.base + raw.clamp(0.0, 1.0) * self.scale;
        let clamped = windowed.clamp(0.0, STREAMING_CEILING);
        if clamped > self.last {
            self.last = clamped;
            self.sink.report(ProgressUpdate {
                op: self.op,
                progress: clamped,
            });
        }
    }

    /// Emit the single final 1.0. Safe to call more than once; only the
    /// first call reports.
    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.last = 1.0;
        self.sink.report(ProgressUpdate {
            op: self.op,
            progress: 1.0,
        });
    }
}
