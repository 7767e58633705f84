//! Shared data model for the PCM output pipeline.
//!
//! These types cross crate boundaries: the graph manager, the preset pipeline and the
//! bridge binary all speak in terms of [`StreamFormat`], [`EqBandConfig`] and friends.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fewest equalizer bands a graph may be configured with.
pub const EQ_MIN_BANDS: usize = 1;
/// Most equalizer bands a graph may be configured with.
pub const EQ_MAX_BANDS: usize = 64;
/// Lowest accepted band center frequency (Hz).
pub const EQ_MIN_FREQ_HZ: f64 = 20.0;
/// Highest accepted band center frequency (Hz); also the bandwidth ceiling.
pub const EQ_MAX_FREQ_HZ: f64 = 20_000.0;
/// Lowest accepted band gain (dB).
pub const EQ_MIN_GAIN_DB: f64 = -24.0;
/// Highest accepted band gain (dB).
pub const EQ_MAX_GAIN_DB: f64 = 12.0;
/// Band count used before anything is configured.
pub const EQ_DEFAULT_BANDS: usize = 10;

/// Rejected stream descriptor.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("sample rate must be positive")]
    ZeroRate,
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),
    #[error("channel count must be positive")]
    ZeroChannels,
}

/// PCM stream descriptor announced at stream start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Samples per second per channel.
    pub sample_rate: u32,
    /// Significant bits per sample (16, 24 or 32).
    pub bit_depth: u16,
    /// Interleaved channel count.
    pub channels: u16,
}

impl StreamFormat {
    /// Validate and build a stream descriptor.
    pub fn new(sample_rate: u32, bit_depth: u16, channels: u16) -> Result<Self, FormatError> {
        if sample_rate == 0 {
            return Err(FormatError::ZeroRate);
        }
        if !matches!(bit_depth, 16 | 24 | 32) {
            return Err(FormatError::UnsupportedBitDepth(bit_depth));
        }
        if channels == 0 {
            return Err(FormatError::ZeroChannels);
        }
        Ok(Self {
            sample_rate,
            bit_depth,
            channels,
        })
    }

    /// Bytes per sample when samples are packed to their bit depth.
    pub fn packed_bytes_per_sample(&self) -> usize {
        usize::from(self.bit_depth / 8).max(1)
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz/{}-bit/{} ch",
            self.sample_rate, self.bit_depth, self.channels
        )
    }
}

/// A `(sample_rate, bit_depth)` pair an output device accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SupportedFormat {
    pub sample_rate: u32,
    pub bit_depth: u16,
}

impl SupportedFormat {
    pub const fn new(sample_rate: u32, bit_depth: u16) -> Self {
        Self {
            sample_rate,
            bit_depth,
        }
    }
}

/// Lifecycle of the processing graph owned by the manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    /// Never built, or the last construction attempt failed.
    #[default]
    Uninitialized,
    /// Built and accepting chunks.
    Active,
    /// Torn down; the next `create` builds a fresh graph.
    Destroyed,
}

/// One peaking band of the graph equalizer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EqBandConfig {
    /// Center frequency (Hz).
    pub freq: f64,
    /// Bandwidth (Hz), `freq / Q`.
    pub bandwidth: f64,
    /// Gain (dB).
    pub gain: f64,
}

impl EqBandConfig {
    pub const fn new(freq: f64, bandwidth: f64, gain: f64) -> Self {
        Self {
            freq,
            bandwidth,
            gain,
        }
    }
}

/// Stored equalizer configuration. Survives graph rebuilds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EqualizerState {
    pub enabled: bool,
    pub num_bands: usize,
    /// Validated configs in slot order; never longer than `num_bands`.
    pub band_configs: Vec<EqBandConfig>,
}

impl Default for EqualizerState {
    fn default() -> Self {
        Self {
            enabled: false,
            num_bands: EQ_DEFAULT_BANDS,
            band_configs: Vec::new(),
        }
    }
}

/// Anything that accepts a band layout: the equalizer controller, the graph manager,
/// or a handle that forwards to them.
pub trait BandTarget {
    /// Replace the band layout.
    fn configure_bands(&mut self, num_bands: usize, configs: &[EqBandConfig]);
    /// Switch the equalizer on or off without touching the stored layout.
    fn set_enabled(&mut self, enabled: bool);
}

/// Point-in-time view of the output pipeline, for status displays.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Graph lifecycle state.
    pub state: GraphState,
    /// Identity of the live graph instance.
    pub graph_id: Option<u64>,
    /// Format the live graph was built for.
    pub stream_format: Option<StreamFormat>,
    /// Sample encoding the source currently declares (e.g. `S24_32LE`).
    pub source_encoding: Option<String>,
    /// Rate delivered to the sink (Hz).
    pub output_rate: Option<u32>,
    /// Bit depth delivered to the sink.
    pub output_bit_depth: Option<u16>,
    /// Whether a resample stage is linked.
    pub resampling: bool,
    /// Linked stages, source first.
    pub topology: Vec<String>,
    /// Sink description.
    pub sink: Option<String>,
    /// Stored volume in `[0, 1]`.
    pub volume: f64,
    pub muted: bool,
    pub paused: bool,
    pub eq_enabled: bool,
    pub eq_num_bands: usize,
    /// Chunks accepted by the source.
    pub chunks_pushed: u64,
    /// Chunks dropped before submission (bad size).
    pub chunks_dropped: u64,
    /// Submissions the source did not accept.
    pub push_failures: u64,
    /// Container width changes detected on 24-bit streams.
    pub width_switches: u64,
    /// A delayed teardown is scheduled.
    pub teardown_pending: bool,
}

/// Verbose diagnostics switch.
///
/// When on, format negotiation, graph topology and dropped-filter detail are logged at
/// `info` instead of `debug`. Nothing else changes.
pub mod diag {
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicU8, Ordering};

    /// Environment variable that turns verbose diagnostics on.
    pub const DEBUG_ENV: &str = "PCM_OUTPUT_DEBUG";

    const UNSET: u8 = 0;
    const OFF: u8 = 1;
    const ON: u8 = 2;

    static OVERRIDE: AtomicU8 = AtomicU8::new(UNSET);
    static FROM_ENV: OnceLock<bool> = OnceLock::new();

    /// Whether verbose diagnostics are on (explicit setting first, then the environment).
    pub fn debug_enabled() -> bool {
        match OVERRIDE.load(Ordering::Relaxed) {
            OFF => false,
            ON => true,
            _ => *FROM_ENV.get_or_init(|| env_flag(std::env::var(DEBUG_ENV).ok().as_deref())),
        }
    }

    /// Force verbose diagnostics on or off, overriding the environment.
    pub fn set_debug(enabled: bool) {
        OVERRIDE.store(if enabled { ON } else { OFF }, Ordering::Relaxed);
    }

    pub(crate) fn env_flag(value: Option<&str>) -> bool {
        match value.map(str::trim) {
            None | Some("") | Some("0") => false,
            Some(v) => !v.eq_ignore_ascii_case("false") && !v.eq_ignore_ascii_case("off"),
        }
    }
}

/// Log at `info` when verbose diagnostics are on, `debug` otherwise.
///
/// Takes the same arguments as `tracing::info!`.
#[macro_export]
macro_rules! verbose {
    ($($arg:tt)+) => {
        if $crate::diag::debug_enabled() {
            ::tracing::info!($($arg)+)
        } else {
            ::tracing::debug!($($arg)+)
        }
    };
}
