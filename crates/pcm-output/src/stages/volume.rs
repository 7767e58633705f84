//! Software volume and mute.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::Result;

use super::{AudioBlock, Stage, StageKind};

/// Volume and mute shared between the control thread and the volume stage.
#[derive(Debug)]
pub struct VolumeControl {
    volume_bits: AtomicU32,
    muted: AtomicBool,
}

impl VolumeControl {
    pub fn new(volume: f32, muted: bool) -> Self {
        Self {
            volume_bits: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(muted),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        let v = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
        self.volume_bits.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Linear gain currently requested.
    pub fn gain(&self) -> f32 {
        if self.is_muted() { 0.0 } else { self.volume() }
    }
}

/// Applies [`VolumeControl`] gain, ramping across a block when the gain changed.
pub struct VolumeStage {
    control: Arc<VolumeControl>,
    last_gain: Option<f32>,
}

impl VolumeStage {
    pub fn new(control: Arc<VolumeControl>) -> Self {
        Self {
            control,
            last_gain: None,
        }
    }
}

impl Stage for VolumeStage {
    fn kind(&self) -> StageKind {
        StageKind::Volume
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        let target = self.control.gain();
        let start = self.last_gain.unwrap_or(target);
        self.last_gain = Some(target);

        let frames = block.frames();
        if frames == 0 {
            return Ok(());
        }
        if (start - target).abs() < f32::EPSILON {
            if (target - 1.0).abs() >= f32::EPSILON {
                block.samples.iter_mut().for_each(|s| *s *= target);
            }
            return Ok(());
        }

        let step = (target - start) / frames as f32;
        for (i, frame) in block.samples.chunks_exact_mut(block.channels).enumerate() {
            let g = start + step * (i + 1) as f32;
            frame.iter_mut().for_each(|s| *s *= g);
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.last_gain = None;
    }
}
