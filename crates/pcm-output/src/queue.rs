//! Thread-safe bounded queues between the control thread, the streaming thread and the
//! output callback.
//!
//! - [`BufferQueue`]: timestamped PCM buffers from the source to the streaming thread,
//!   bounded by queued *duration* so latency stays low regardless of format.
//! - [`SharedAudio`]: interleaved `f32` samples from the streaming thread to the CPAL
//!   callback, drained without blocking.
//!
//! Both queues make shutdown deterministic with `close()` and support discarding
//! everything buffered for flushes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::format::SampleEncoding;
use crate::timeline::BufferTiming;

/// Raw PCM bytes as submitted to the source, tagged with the caps in force at push time.
#[derive(Clone, Debug)]
pub struct RawBuffer {
    pub data: Vec<u8>,
    pub encoding: SampleEncoding,
    pub channels: usize,
    pub sample_rate: u32,
    pub timing: BufferTiming,
}

/// What the streaming thread receives.
#[derive(Debug)]
pub enum QueueItem {
    Buffer(RawBuffer),
    /// Everything before this point was discarded; stages must drop their state.
    Flush,
}

/// Result of submitting a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowReturn {
    Ok,
    /// No space freed up within the submission timeout.
    Timeout,
    /// The queue was closed (graph torn down).
    Closed,
}

impl std::fmt::Display for FlowReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FlowReturn::Ok => "ok",
            FlowReturn::Timeout => "timeout",
            FlowReturn::Closed => "closed",
        })
    }
}

/// How a [`BufferQueue`] decides it is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueLimit {
    /// Total buffered duration.
    Time(Duration),
    /// Buffer count; `Buffers(1)` is a plain hand-off.
    Buffers(usize),
}

/// Bounded FIFO of [`QueueItem`]s.
///
/// A buffer is always accepted into an empty queue, so a single oversized chunk cannot
/// wedge the stream.
pub struct BufferQueue {
    limit: QueueLimit,
    inner: Mutex<BufferInner>,
    cv: Condvar,
}

#[derive(Default)]
struct BufferInner {
    items: VecDeque<QueueItem>,
    buffers: usize,
    queued_ns: u64,
    closed: bool,
}

impl BufferQueue {
    pub fn new(limit: QueueLimit) -> Self {
        Self {
            limit,
            inner: Mutex::new(BufferInner::default()),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_full(&self, g: &BufferInner) -> bool {
        if g.buffers == 0 {
            return false;
        }
        match self.limit {
            QueueLimit::Time(limit) => u128::from(g.queued_ns) >= limit.as_nanos(),
            QueueLimit::Buffers(n) => g.buffers >= n.max(1),
        }
    }

    /// Append `buf`, waiting at most `timeout` for space.
    pub fn push(&self, buf: RawBuffer, timeout: Duration) -> FlowReturn {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if g.closed {
                return FlowReturn::Closed;
            }
            if !self.is_full(&g) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return FlowReturn::Timeout;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            g = ng;
        }

        g.buffers += 1;
        g.queued_ns = g
            .queued_ns
            .saturating_add(u64::try_from(buf.timing.duration_ns).unwrap_or(0));
        g.items.push_back(QueueItem::Buffer(buf));
        drop(g);
        self.cv.notify_all();
        FlowReturn::Ok
    }

    /// Block until an item is available. Returns `None` once closed.
    pub fn pop(&self) -> Option<QueueItem> {
        let mut g = self.lock();
        while g.items.is_empty() && !g.closed {
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
        if g.closed {
            return None;
        }
        let item = g.items.pop_front()?;
        if let QueueItem::Buffer(buf) = &item {
            g.buffers = g.buffers.saturating_sub(1);
            g.queued_ns = g
                .queued_ns
                .saturating_sub(u64::try_from(buf.timing.duration_ns).unwrap_or(0));
        }
        drop(g);
        self.cv.notify_all();
        Some(item)
    }

    /// Discard everything queued and leave a [`QueueItem::Flush`] marker.
    pub fn flush(&self) {
        let mut g = self.lock();
        if g.closed {
            return;
        }
        g.items.clear();
        g.buffers = 0;
        g.queued_ns = 0;
        g.items.push_back(QueueItem::Flush);
        drop(g);
        self.cv.notify_all();
    }

    /// Stop accepting buffers and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        g.items.clear();
        g.buffers = 0;
        g.queued_ns = 0;
        drop(g);
        self.cv.notify_all();
    }

    /// Buffers and total duration currently queued.
    pub fn queued(&self) -> (usize, Duration) {
        let g = self.lock();
        (g.buffers, Duration::from_nanos(g.queued_ns))
    }
}

/// Thread-safe bounded queue for interleaved `f32` audio samples.
///
/// ## Design
/// - **Bounded** by `max_buffered_samples` to cap memory and latency.
/// - Uses a single [`Condvar`] as a general "state changed" signal.
/// - A `done` flag is stored *under the same mutex* as the queue to avoid races.
///
/// The `channels` count is fixed for the lifetime of the queue.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
}

/// Compute a conservative queue capacity in **samples** for a `(rate, channels, seconds)` target.
///
/// - If `buffer_seconds` is non-finite or `<= 0.0`, a safe fallback is used.
/// - The returned value is `ceil(rate_hz * buffer_seconds) * channels` (saturating).
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        0.5
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Maximum buffered frames (capacity) for this queue.
    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Drop every buffered sample and wake blocked producers.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, waiting at most `timeout` for space.
    ///
    /// Returns how many samples were queued; fewer than `samples.len()` means the wait
    /// timed out or the queue was closed.
    pub fn push_interleaved_timeout(&self, samples: &[f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.lock();

            while g.queue.len() >= self.max_buffered_samples && !g.done {
                let now = Instant::now();
                if now >= deadline {
                    return offset;
                }
                let (ng, _timeout) = self
                    .cv
                    .wait_timeout(g, deadline - now)
                    .unwrap_or_else(|e| e.into_inner());
                g = ng;
            }
            if g.done {
                return offset;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            if take > 0 {
                self.cv.notify_all();
            }
        }
        offset
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Return up to `max_frames` whole frames without blocking, or `None` if empty.
    pub fn try_pop(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();

        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        let queued = g.queue.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(queued);
        Some(out)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_buffered_samples / 8).max(self.channels * 16);
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_samples = queued,
                    threshold_samples = threshold,
                    "output queue low watermark"
                );
            }
        }
    }
}
