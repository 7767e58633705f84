//! Integer PCM to float conversion, and the float sanitizer that guards the resampler.

use anyhow::{Result, bail};

use super::{AudioBlock, Stage, StageKind};

/// Decodes the block's raw bytes into interleaved `f32` samples.
#[derive(Debug, Default)]
pub struct ConvertStage {
    scratch: Vec<f32>,
}

impl ConvertStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for ConvertStage {
    fn kind(&self) -> StageKind {
        StageKind::Convert
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let frame_bytes = block.encoding.bytes_per_sample() * block.channels;
        if block.raw.len() % frame_bytes != 0 {
            bail!(
                "{} bytes is not a whole number of {} frames",
                block.raw.len(),
                block.encoding
            );
        }

        self.scratch.clear();
        block.encoding.decode_into(&block.raw, &mut self.scratch);
        std::mem::swap(&mut block.samples, &mut self.scratch);
        block.raw.clear();
        Ok(())
    }
}

/// Replaces non-finite samples with silence and clamps to `[-1, 1]`.
///
/// Sits between the equalizer and the resampler: boosted bands can overshoot, and the
/// sinc resampler spreads a single NaN across its whole window.
#[derive(Debug, Default)]
pub struct PostConvertStage;

impl Stage for PostConvertStage {
    fn kind(&self) -> StageKind {
        StageKind::PostConvert
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        for s in &mut block.samples {
            *s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
        }
        Ok(())
    }
}
