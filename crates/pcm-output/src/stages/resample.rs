//! Sample-rate conversion stage.
//!
//! Wraps Rubato's async sinc resampler. Input is accumulated until a full chunk is
//! available, so a block may produce no output and a later one more than usual.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use super::{AudioBlock, Stage, StageKind};

pub struct ResampleStage {
    resampler: Box<dyn Resampler<f32>>,
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl ResampleStage {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(anyhow!("invalid resample rates {src_rate} -> {dst_rate}"));
        }
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let f_ratio = f64::from(dst_rate) / f64::from(src_rate);

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?;

        // Room for one chunk at the highest ratio plus the sinc tail.
        let out_frames = (chunk_frames as f64 * f_ratio * 1.5).ceil() as usize + 64;

        tracing::debug!(src_rate, dst_rate, channels, chunk_frames, "resampler ready");
        Ok(Self {
            resampler: Box::new(resampler),
            src_rate,
            dst_rate,
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out: vec![0.0; out_frames * channels],
        })
    }

    fn run_chunk(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let chunk_samples = self.chunk_frames * self.channels;
        let input = InterleavedSlice::new(&self.pending[..chunk_samples], self.channels, self.chunk_frames)
            .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;

        let out_capacity_frames = self.out.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.out, self.channels, out_capacity_frames)
            .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: None,
        };
        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| anyhow!("resampler process error: {e}"))?;

        out.extend_from_slice(&self.out[..nbr_out * self.channels]);
        self.pending.drain(..chunk_samples);
        Ok(())
    }
}

impl Stage for ResampleStage {
    fn kind(&self) -> StageKind {
        StageKind::Resample
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        if block.channels != self.channels {
            return Err(anyhow!(
                "resampler built for {} channels, got {}",
                self.channels,
                block.channels
            ));
        }
        self.pending.extend_from_slice(&block.samples);

        let mut produced = Vec::new();
        while self.pending.len() >= self.chunk_frames * self.channels {
            if let Err(e) = self.run_chunk(&mut produced) {
                self.pending.clear();
                return Err(e);
            }
        }

        block.samples = produced;
        block.sample_rate = self.dst_rate;
        Ok(())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.resampler.reset();
        tracing::debug!(src_rate = self.src_rate, dst_rate = self.dst_rate, "resampler reset");
    }
}
