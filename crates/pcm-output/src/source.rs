//! Control-side end of a graph: where chunks enter.

use std::sync::Arc;
use std::time::Duration;

use pcm_types::StreamFormat;

use crate::format::SampleEncoding;
use crate::queue::{BufferQueue, FlowReturn, RawBuffer};
use crate::timeline::BufferTiming;

/// Declares the stream caps and submits timestamped buffers to the graph's queue.
pub struct AppSource {
    format: StreamFormat,
    encoding: SampleEncoding,
    queue: Arc<BufferQueue>,
    push_timeout: Duration,
}

impl AppSource {
    pub fn new(format: StreamFormat, encoding: SampleEncoding, queue: Arc<BufferQueue>) -> Self {
        Self {
            format,
            encoding,
            queue,
            push_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Encoding currently declared on the source caps.
    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Re-declare the caps; buffers pushed from now on carry the new layout.
    pub fn set_encoding(&mut self, encoding: SampleEncoding) {
        self.encoding = encoding;
    }

    pub fn queue(&self) -> &Arc<BufferQueue> {
        &self.queue
    }

    /// Submit one chunk. Blocks at most the push timeout.
    pub fn push(&self, data: Vec<u8>, timing: BufferTiming) -> FlowReturn {
        self.queue.push(
            RawBuffer {
                data,
                encoding: self.encoding,
                channels: usize::from(self.format.channels),
                sample_rate: self.format.sample_rate,
                timing,
            },
            self.push_timeout,
        )
    }
}
