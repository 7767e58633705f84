//! 24-bit container width detection.
//!
//! Senders disagree on how 24-bit samples travel: packed in 3 bytes or padded into 4.
//! The announced format cannot tell the two apart, so each chunk length is checked
//! against both frame sizes and the source switches layout when the data says so.

use pcm_types::StreamFormat;

use crate::format::SampleEncoding;

/// Outcome of inspecting one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WidthDecision {
    /// Chunk matches the current layout.
    Accept { frame_size: usize },
    /// Chunk forced a layout change; the source must re-declare its encoding.
    Switched {
        frame_size: usize,
        encoding: SampleEncoding,
    },
    /// Chunk length fits no known layout.
    Drop,
}

/// Tracks an optional bytes-per-sample override for 24-bit streams.
#[derive(Clone, Debug, Default)]
pub struct SampleWidthDetector {
    override_bytes: Option<usize>,
}

impl SampleWidthDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current override, if the stream was found to use 4-byte containers.
    pub fn override_bytes(&self) -> Option<usize> {
        self.override_bytes
    }

    pub fn bytes_per_sample(&self, format: &StreamFormat) -> usize {
        match self.override_bytes {
            Some(bytes) if format.bit_depth == 24 => bytes,
            _ => format.packed_bytes_per_sample(),
        }
    }

    pub fn frame_size(&self, format: &StreamFormat) -> usize {
        usize::from(format.channels) * self.bytes_per_sample(format)
    }

    /// Encoding implied by the current width for `format`.
    pub fn encoding(&self, format: &StreamFormat) -> Option<SampleEncoding> {
        SampleEncoding::for_depth(format.bit_depth, self.bytes_per_sample(format))
    }

    /// Check `len` against the current layout, switching layouts for 24-bit streams.
    pub fn inspect(&mut self, format: &StreamFormat, len: usize) -> WidthDecision {
        let frame_size = self.frame_size(format);
        if frame_size == 0 {
            return WidthDecision::Drop;
        }
        if len % frame_size == 0 {
            return WidthDecision::Accept { frame_size };
        }
        if format.bit_depth != 24 {
            return WidthDecision::Drop;
        }

        let channels = usize::from(format.channels);
        let padded = channels * 4;
        let packed = channels * 3;
        if len % padded == 0 {
            self.override_bytes = Some(4);
            tracing::info!(
                len,
                "detected 24-bit PCM in 32-bit containers; switching to S24_32LE"
            );
            return WidthDecision::Switched {
                frame_size: padded,
                encoding: SampleEncoding::S24In32Le,
            };
        }
        if self.override_bytes.is_some() && len % packed == 0 {
            self.override_bytes = None;
            tracing::info!(len, "detected packed 24-bit PCM; switching to S24LE");
            return WidthDecision::Switched {
                frame_size: packed,
                encoding: SampleEncoding::S24Le,
            };
        }
        WidthDecision::Drop
    }

    pub fn reset(&mut self) {
        self.override_bytes = None;
    }
}
