//! Output format fix-up: snap samples to the negotiated bit depth.

use anyhow::{Result, bail};

use super::{AudioBlock, Stage, StageKind};
use crate::format::quantize;

pub struct FormatFixStage {
    rate: u32,
    bit_depth: u16,
}

impl FormatFixStage {
    pub fn new(rate: u32, bit_depth: u16) -> Self {
        Self { rate, bit_depth }
    }
}

impl Stage for FormatFixStage {
    fn kind(&self) -> StageKind {
        StageKind::FormatFix
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        if block.sample_rate != self.rate {
            bail!(
                "block at {} Hz reached format fix-up for {} Hz",
                block.sample_rate,
                self.rate
            );
        }
        if block.bit_depth != self.bit_depth || self.bit_depth < 24 {
            let depth = self.bit_depth;
            block.samples.iter_mut().for_each(|s| *s = quantize(*s, depth));
        }
        block.bit_depth = self.bit_depth;
        Ok(())
    }
}
