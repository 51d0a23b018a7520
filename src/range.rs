//! Time-range gate.
//!
//! A pure filter between the demuxer and whatever consumes access units.
//! Seeks the demuxer to the nearest sync point before the range start,
//! drops AUs that lie before the range, rebases kept timestamps so the
//! first emitted one is zero, and closes the feed once the range end is
//! reached.

use crate::demux::{AccessUnit, Demuxer};
use crate::error::Result;
use crate::types::TimeRange;

/// What the gate decided about one AU.
pub(crate) enum GateDecision {
    /// Pass downstream with the rebased timestamp
    Feed {
        au: AccessUnit,
        rebased_us: i64,
    },
    /// Before the range start; advance the demuxer without queueing
    Skip,
    /// Range closed (or stream would exceed it); signal EOS downstream
    End,
}

pub(crate) struct RangeGate {
    range: Option<TimeRange>,
    /// Rebase anchor, latched from the first admitted AU
    base_us: Option<i64>,
    closed: bool,
}

impl RangeGate {
    pub(crate) fn new(range: Option<TimeRange>) -> Self {
        Self {
            range,
            base_us: None,
            closed: false,
        }
    }

    /// Seek the demuxer to the range start before the pipeline begins.
    /// A no-op without a range.
    pub(crate) fn prime(&mut self, demuxer: &mut Demuxer) -> Result<()> {
        if let Some(range) = self.range {
            let landed = demuxer.seek_to_sync(range.start_us)?;
            tracing::debug!(
                start_us = range.start_us,
                end_us = range.end_us,
                landed_us = landed,
                "range gate primed"
            );
        }
        Ok(())
    }

    /// Admit, skip or refuse one AU.
    pub(crate) fn admit(&mut self, au: AccessUnit) -> GateDecision {
        if self.closed {
            return GateDecision::End;
        }
        let ts = au.pts_us;
        if let Some(range) = self.range {
            if ts < range.start_us {
                return GateDecision::Skip;
            }
            if ts >= range.end_us {
                self.closed = true;
                return GateDecision::End;
            }
        }
        let base = *self.base_us.get_or_insert(ts);
        GateDecision::Feed {
            au,
            rebased_us: ts - base,
        }
    }

    /// Microseconds of source material consumed so far, for progress.
    pub(crate) fn processed_us(&self, last_seen_us: i64) -> i64 {
        let start = self.range.map(|r| r.start_us).unwrap_or(0);
        (last_seen_us - start).max(0)
    }

    /// How much source material this run is expected to consume.
    pub(crate) fn expected_duration_us(&self, track_duration_us: i64) -> i64 {
        match self.range {
            Some(range) => range.duration_us(),
            None => track_duration_us,
        }
    }
}
