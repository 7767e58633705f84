//! Presentation timestamps for incoming chunks.
//!
//! Chunk timestamps come from the sender's clock and may repeat, go backwards or jump.
//! The sequencer maps them onto a non-decreasing nanosecond timeline relative to the
//! first chunk, falling back to gapless spacing whenever the input would go backwards.

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Timing attached to one buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferTiming {
    pub pts_ns: i64,
    pub dts_ns: i64,
    pub duration_ns: i64,
}

/// Duration of `sample_count` frames at `sample_rate`, floored to whole nanoseconds.
pub fn duration_ns(sample_count: u64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    let ns = u128::from(sample_count) * NANOS_PER_SEC / u128::from(sample_rate);
    i64::try_from(ns).unwrap_or(i64::MAX)
}

/// Owns the stream start and last emitted PTS.
#[derive(Clone, Debug, Default)]
pub struct TimestampSequencer {
    stream_start_us: Option<i64>,
    last_pts_ns: Option<i64>,
}

impl TimestampSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the first chunk since the last flush.
    pub fn stream_start_us(&self) -> Option<i64> {
        self.stream_start_us
    }

    pub fn last_pts_ns(&self) -> Option<i64> {
        self.last_pts_ns
    }

    /// Timing for a chunk captured at `ts_us` holding `sample_count` frames.
    pub fn next(&mut self, ts_us: i64, sample_count: u64, sample_rate: u32) -> BufferTiming {
        let duration_ns = duration_ns(sample_count, sample_rate);
        let start = *self.stream_start_us.get_or_insert(ts_us);
        let mut pts_ns = ts_us.saturating_sub(start).saturating_mul(1000).max(0);
        if let Some(last) = self.last_pts_ns {
            if pts_ns <= last {
                pts_ns = last.saturating_add(duration_ns);
            }
        }
        self.last_pts_ns = Some(pts_ns);
        BufferTiming {
            pts_ns,
            dts_ns: pts_ns,
            duration_ns,
        }
    }

    /// Forget the stream start; the next chunk starts a new timeline at zero.
    pub fn flush(&mut self) {
        self.stream_start_us = None;
        self.last_pts_ns = None;
    }
}
