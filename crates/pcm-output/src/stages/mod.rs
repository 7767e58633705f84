//! Processing stages and the factory that creates them.
//!
//! Every stage is created through [`StageFactory`], which reports a missing stage as
//! [`StageError::Unavailable`] instead of handing back a null. The graph's linking
//! routine decides whether that is fatal.

pub mod convert;
pub mod equalizer;
pub mod format_fix;
pub mod resample;
pub mod volume;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OutputConfig;
use crate::format::SampleEncoding;
use crate::graph::GraphPlan;
use crate::queue::{BufferQueue, QueueLimit, RawBuffer};
use crate::source::AppSource;
use crate::timeline::BufferTiming;

use equalizer::{EqualizerBank, EqualizerStage};
use volume::{VolumeControl, VolumeStage};

/// Position of a stage in the graph, source first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Source,
    Buffer,
    Convert,
    Volume,
    Equalizer,
    PostConvert,
    Resample,
    FormatFix,
    Sink,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Buffer => "buffer",
            StageKind::Convert => "convert",
            StageKind::Volume => "volume",
            StageKind::Equalizer => "equalizer",
            StageKind::PostConvert => "post_convert",
            StageKind::Resample => "resample",
            StageKind::FormatFix => "format_fix",
            StageKind::Sink => "sink",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage could not be created.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("{stage} stage unavailable: {reason}")]
    Unavailable { stage: StageKind, reason: String },
}

impl StageError {
    pub fn unavailable(stage: StageKind, reason: impl Into<String>) -> Self {
        StageError::Unavailable {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Unavailable { stage, .. } => *stage,
        }
    }
}

/// Audio travelling through the streaming thread.
///
/// Starts as raw bytes; the convert stage turns them into interleaved `f32` samples that
/// every later stage works on.
#[derive(Clone, Debug)]
pub struct AudioBlock {
    pub raw: Vec<u8>,
    pub encoding: SampleEncoding,
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
    /// Depth the samples are meant to carry downstream.
    pub bit_depth: u16,
    pub timing: BufferTiming,
}

impl AudioBlock {
    pub fn from_raw(buf: RawBuffer) -> Self {
        let bit_depth = match buf.encoding {
            SampleEncoding::S16Le => 16,
            SampleEncoding::S24Le | SampleEncoding::S24In32Le => 24,
            SampleEncoding::S32Le => 32,
        };
        Self {
            raw: buf.data,
            encoding: buf.encoding,
            samples: Vec::new(),
            channels: buf.channels.max(1),
            sample_rate: buf.sample_rate,
            bit_depth,
            timing: buf.timing,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

/// One processing step on the streaming thread.
pub trait Stage: Send {
    fn kind(&self) -> StageKind;

    /// Transform `block` in place. An error drops the block; the graph keeps running.
    fn process(&mut self, block: &mut AudioBlock) -> Result<()>;

    /// Forget internal state (filter memories, delay lines) after a flush.
    fn flush(&mut self) {}
}

/// What a factory needs to build the stages of one graph.
pub struct StageContext<'a> {
    pub plan: &'a GraphPlan,
    pub config: &'a OutputConfig,
    /// Live handle the volume stage reads.
    pub volume: &'a Arc<VolumeControl>,
    /// Live band slots the equalizer stage reads.
    pub equalizer: &'a Arc<EqualizerBank>,
}

/// Creates graph stages, or explains why one cannot exist.
pub trait StageFactory: Send + Sync {
    /// Queue bound for the buffering stage.
    fn buffer(&self, config: &OutputConfig) -> Result<QueueLimit, StageError>;

    /// Source endpoint feeding `queue`.
    fn source(&self, plan: &GraphPlan, queue: Arc<BufferQueue>) -> Result<AppSource, StageError>;

    /// Processing stage of `kind` (convert through format-fix).
    fn stage(&self, kind: StageKind, ctx: &StageContext<'_>) -> Result<Box<dyn Stage>, StageError>;
}

/// In-process stages. Individual kinds can be switched off to run degraded graphs.
#[derive(Clone, Debug, Default)]
pub struct NativeStages {
    disabled: HashSet<StageKind>,
}

impl NativeStages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with every kind in `disabled` reported as unavailable.
    pub fn with_disabled(disabled: impl IntoIterator<Item = StageKind>) -> Self {
        Self {
            disabled: disabled.into_iter().collect(),
        }
    }

    /// Report `kind` as unavailable from now on.
    pub fn disable(mut self, kind: StageKind) -> Self {
        self.disabled.insert(kind);
        self
    }

    fn check(&self, kind: StageKind) -> Result<(), StageError> {
        if self.disabled.contains(&kind) {
            return Err(StageError::unavailable(kind, "disabled by configuration"));
        }
        Ok(())
    }
}

impl StageFactory for NativeStages {
    fn buffer(&self, config: &OutputConfig) -> Result<QueueLimit, StageError> {
        self.check(StageKind::Buffer)?;
        let buffer_time = config.buffer_time();
        if buffer_time.is_zero() {
            return Err(StageError::unavailable(StageKind::Buffer, "zero buffer time"));
        }
        Ok(QueueLimit::Time(buffer_time))
    }

    fn source(&self, plan: &GraphPlan, queue: Arc<BufferQueue>) -> Result<AppSource, StageError> {
        self.check(StageKind::Source)?;
        Ok(AppSource::new(plan.format, plan.encoding, queue))
    }

    fn stage(&self, kind: StageKind, ctx: &StageContext<'_>) -> Result<Box<dyn Stage>, StageError> {
        self.check(kind)?;
        let plan = ctx.plan;
        let stage: Box<dyn Stage> = match kind {
            StageKind::Convert => Box::new(convert::ConvertStage::new()),
            StageKind::Volume => Box::new(VolumeStage::new(ctx.volume.clone())),
            StageKind::Equalizer => Box::new(EqualizerStage::new(ctx.equalizer.clone())),
            StageKind::PostConvert => Box::new(convert::PostConvertStage),
            StageKind::Resample => Box::new(
                resample::ResampleStage::new(
                    plan.format.sample_rate,
                    plan.output_rate,
                    usize::from(plan.format.channels),
                    ctx.config.resample_chunk_frames,
                )
                .map_err(|e| StageError::unavailable(kind, format!("{e:#}")))?,
            ),
            StageKind::FormatFix => Box::new(format_fix::FormatFixStage::new(
                plan.output_rate,
                plan.output_bit_depth,
            )),
            StageKind::Source | StageKind::Buffer | StageKind::Sink => {
                return Err(StageError::unavailable(kind, "not a processing stage"));
            }
        };
        Ok(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_types::StreamFormat;
    use std::time::Duration;

    #[test]
    fn disabled_kind_reports_unavailable() {
        let factory = NativeStages::new().disable(StageKind::Equalizer);
        let plan = GraphPlan::native(StreamFormat::new(48_000, 16, 2).unwrap(), SampleEncoding::S16Le);
        let config = OutputConfig::default();
        let volume = Arc::new(VolumeControl::new(1.0, false));
        let eq = Arc::new(EqualizerBank::new());
        let ctx = StageContext {
            plan: &plan,
            config: &config,
            volume: &volume,
            equalizer: &eq,
        };

        let err = factory.stage(StageKind::Equalizer, &ctx).err().unwrap();
        assert_eq!(err.stage(), StageKind::Equalizer);
        assert!(factory.stage(StageKind::Volume, &ctx).is_ok());
    }

    #[test]
    fn zero_buffer_time_disables_buffering() {
        let factory = NativeStages::new();
        let mut config = OutputConfig::default();
        assert_eq!(
            factory.buffer(&config),
            Ok(QueueLimit::Time(Duration::from_millis(200)))
        );
        config.buffer_time_ms = 0;
        assert!(factory.buffer(&config).is_err());
    }

    #[test]
    fn stage_kind_names_are_snake_case() {
        assert_eq!(StageKind::PostConvert.to_string(), "post_convert");
        assert_eq!(StageKind::FormatFix.name(), "format_fix");
    }
}
