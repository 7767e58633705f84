//! Sink seam: where the graph's float stream leaves the process.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

/// Format the graph delivers to its sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkSpec {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

/// Flags the graph flips from the control thread while the sink runs elsewhere.
#[derive(Debug, Default)]
pub struct SinkControl {
    paused: AtomicBool,
    closing: AtomicBool,
}

impl SinkControl {
    /// When paused the sink outputs silence and keeps its buffered audio.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Set once the graph is being torn down; blocked writes should give up.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    pub(crate) fn begin_close(&self) {
        self.closing.store(true, Ordering::Relaxed);
    }
}

/// Final stage of a graph.
///
/// `open` runs on the control thread during construction; `write`, `flush` and `close`
/// run on the graph's streaming thread.
pub trait AudioSink: Send {
    /// Human-readable description for logs and status.
    fn name(&self) -> String;

    /// Acquire the output for `spec`. Failing here aborts graph construction.
    fn open(&mut self, spec: SinkSpec, control: std::sync::Arc<SinkControl>) -> Result<()>;

    /// Deliver interleaved samples in `[-1, 1]`. May block for backpressure.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Drop audio accepted but not yet played.
    fn flush(&mut self) {}

    /// Release the output.
    fn close(&mut self) {}
}
