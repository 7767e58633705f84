use std::time::Duration;

pub use pcm_types::diag::{DEBUG_ENV, debug_enabled, set_debug};

use crate::stages::StageKind;

/// Output pipeline tuning shared by the graph, its stages and the controller.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Audio the buffering stage may hold before `push_chunk` waits (ms).
    pub buffer_time_ms: u64,
    /// Longest a chunk submission may wait for buffer space (ms).
    pub push_timeout_ms: u64,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
    /// Sink-side queue target in seconds.
    pub sink_buffer_seconds: f32,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Delay between stream end and graph teardown (ms).
    pub teardown_grace_ms: u64,
    /// Volume applied until a caller sets one, in `[0, 1]`.
    pub default_volume: f64,
    /// Optional stages to treat as unavailable.
    pub disabled_stages: Vec<StageKind>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_time_ms: 200,
            push_timeout_ms: 500,
            resample_chunk_frames: 1024,
            sink_buffer_seconds: 0.5,
            refill_max_frames: 4096,
            teardown_grace_ms: 2000,
            default_volume: 0.65,
            disabled_stages: Vec::new(),
        }
    }
}

impl OutputConfig {
    pub fn buffer_time(&self) -> Duration {
        Duration::from_millis(self.buffer_time_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}
