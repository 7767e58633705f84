//! Configuration loading and resolution.
//!
//! The TOML file is optional. CLI flags win over file values, file values over defaults.

use std::path::Path;

use anyhow::{Context, Result, bail};
use eq_presets::StoreConfig;
use pcm_output::config::OutputConfig;
use pcm_output::stages::StageKind;
use pcm_types::EqBandConfig;
use serde::Deserialize;

use crate::cli::Args;

/// Top-level config loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    /// Output device, substring match.
    pub device: Option<String>,
    /// Enable verbose diagnostics.
    pub debug: Option<bool>,
    /// Output pipeline tuning.
    pub output: Option<OutputSection>,
    /// Equalizer applied at startup.
    pub equalizer: Option<EqualizerSection>,
    /// Preset database cache.
    pub presets: Option<StoreConfig>,
}

/// `[output]` table.
#[derive(Debug, Default, Deserialize)]
pub struct OutputSection {
    pub buffer_time_ms: Option<u64>,
    pub push_timeout_ms: Option<u64>,
    pub resample_chunk_frames: Option<usize>,
    pub sink_buffer_seconds: Option<f32>,
    pub refill_max_frames: Option<usize>,
    /// Delay between stream end and graph teardown.
    pub teardown_grace_ms: Option<u64>,
    /// Volume in [0, 1] until a client sets one.
    pub volume: Option<f64>,
    /// Optional stages to leave out, e.g. `["equalizer"]`.
    pub disabled_stages: Option<Vec<StageKind>>,
}

/// `[equalizer]` table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EqualizerSection {
    pub enabled: Option<bool>,
    /// Band count; defaults to the number of listed bands.
    pub num_bands: Option<usize>,
    pub bands: Option<Vec<EqBandConfig>>,
    /// Preset id or name, applied after `bands`.
    pub preset: Option<String>,
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<BridgeConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

impl OutputSection {
    fn apply(&self, out: &mut OutputConfig) {
        if let Some(v) = self.buffer_time_ms {
            out.buffer_time_ms = v;
        }
        if let Some(v) = self.push_timeout_ms {
            out.push_timeout_ms = v;
        }
        if let Some(v) = self.resample_chunk_frames {
            out.resample_chunk_frames = v;
        }
        if let Some(v) = self.sink_buffer_seconds {
            out.sink_buffer_seconds = v;
        }
        if let Some(v) = self.refill_max_frames {
            out.refill_max_frames = v;
        }
        if let Some(v) = self.teardown_grace_ms {
            out.teardown_grace_ms = v;
        }
        if let Some(v) = self.volume {
            out.default_volume = v;
        }
        if let Some(stages) = &self.disabled_stages {
            out.disabled_stages = stages.clone();
        }
    }
}

/// Effective settings after merging file and flags.
#[derive(Clone, Debug)]
pub struct Settings {
    pub device: Option<String>,
    pub debug: bool,
    pub output: OutputConfig,
    pub equalizer: EqualizerSection,
    pub presets: StoreConfig,
}

impl Settings {
    pub fn resolve(args: &Args, file: BridgeConfig) -> Result<Self> {
        let mut output = OutputConfig::default();
        if let Some(section) = &file.output {
            section.apply(&mut output);
        }
        if let Some(volume) = args.volume {
            output.default_volume = volume;
        }
        if !(0.0..=1.0).contains(&output.default_volume) {
            bail!("volume must be within [0, 1], got {}", output.default_volume);
        }
        if output.resample_chunk_frames == 0 {
            bail!("resample_chunk_frames must be positive");
        }

        Ok(Self {
            device: normalize_device_name(args.device.clone().or(file.device)),
            debug: args.debug || file.debug.unwrap_or(false),
            output,
            equalizer: file.equalizer.unwrap_or_default(),
            presets: file.presets.unwrap_or_default(),
        })
    }

    /// Settings for `path`, or defaults when no file was given.
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        Self::resolve(args, file)
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
