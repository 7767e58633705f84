//! Multi-band peaking equalizer.
//!
//! [`EqualizerBank`] holds the live band slots that the control thread writes; the
//! stage running on the streaming thread notices changes through a generation counter
//! and rebuilds its biquads. Only peaking bands exist: shelves from presets arrive
//! already approximated as peaks.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use pcm_types::{EQ_DEFAULT_BANDS, EQ_MAX_FREQ_HZ, EQ_MIN_FREQ_HZ, EqBandConfig};

use super::{AudioBlock, Stage, StageKind};

/// Live band slots of one graph.
#[derive(Debug)]
pub struct EqualizerBank {
    bands: Mutex<Vec<EqBandConfig>>,
    generation: AtomicU64,
}

impl Default for EqualizerBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat bands spread logarithmically over the audible range.
pub fn neutral_bands(num_bands: usize) -> Vec<EqBandConfig> {
    let n = num_bands.max(1);
    let ratio = EQ_MAX_FREQ_HZ / EQ_MIN_FREQ_HZ;
    (0..n)
        .map(|i| {
            let pos = if n == 1 { 0.5 } else { i as f64 / (n - 1) as f64 };
            let freq = EQ_MIN_FREQ_HZ * ratio.powf(pos);
            // One octave wide.
            EqBandConfig::new(freq, freq / std::f64::consts::SQRT_2, 0.0)
        })
        .collect()
}

impl EqualizerBank {
    pub fn new() -> Self {
        Self {
            bands: Mutex::new(neutral_bands(EQ_DEFAULT_BANDS)),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EqBandConfig>> {
        self.bands.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn num_bands(&self) -> usize {
        self.lock().len()
    }

    /// Replace every slot at once: `configs` first, flat bands after. When `enabled` is
    /// false all gains are zero.
    pub fn load(&self, num_bands: usize, configs: &[EqBandConfig], enabled: bool) {
        let mut bands = neutral_bands(num_bands);
        for (slot, config) in bands.iter_mut().zip(configs) {
            *slot = *config;
        }
        if !enabled {
            bands.iter_mut().for_each(|b| b.gain = 0.0);
        }
        *self.lock() = bands;
        self.bump();
    }

    pub fn bands(&self) -> Vec<EqBandConfig> {
        self.lock().clone()
    }
}

/// Direct form I peaking biquad, one state set per channel.
#[derive(Clone, Debug)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    state: Vec<[f64; 4]>,
}

impl Biquad {
    /// RBJ cookbook peaking filter. `None` for bands that would not change the signal.
    fn peaking(band: &EqBandConfig, sample_rate: u32, channels: usize) -> Option<Self> {
        if band.gain == 0.0 || band.freq <= 0.0 || band.bandwidth <= 0.0 || sample_rate == 0 {
            return None;
        }
        let fs = f64::from(sample_rate);
        let freq = band.freq.min(fs * 0.45);
        let q = (freq / band.bandwidth).max(0.05);

        let a = 10f64.powf(band.gain / 40.0);
        let w0 = 2.0 * PI * freq / fs;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Some(Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
            state: vec![[0.0; 4]; channels],
        })
    }

    #[inline]
    fn run(&mut self, ch: usize, x: f64) -> f64 {
        let [x1, x2, y1, y2] = self.state[ch];
        let mut y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
        if y.abs() < 1e-25 {
            y = 0.0;
        }
        self.state[ch] = [x, x1, y, y1];
        y
    }

    fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = [0.0; 4]);
    }
}

/// Runs the bank's bands over each block.
pub struct EqualizerStage {
    bank: Arc<EqualizerBank>,
    seen_generation: Option<u64>,
    rate: u32,
    channels: usize,
    filters: Vec<Biquad>,
}

impl EqualizerStage {
    pub fn new(bank: Arc<EqualizerBank>) -> Self {
        Self {
            bank,
            seen_generation: None,
            rate: 0,
            channels: 0,
            filters: Vec::new(),
        }
    }

    fn refresh(&mut self, sample_rate: u32, channels: usize) {
        let generation = self.bank.generation();
        if self.seen_generation == Some(generation)
            && self.rate == sample_rate
            && self.channels == channels
        {
            return;
        }
        self.filters = self
            .bank
            .bands()
            .iter()
            .filter_map(|b| Biquad::peaking(b, sample_rate, channels))
            .collect();
        self.seen_generation = Some(generation);
        self.rate = sample_rate;
        self.channels = channels;
        tracing::debug!(active_bands = self.filters.len(), rate_hz = sample_rate, "equalizer updated");
    }
}

impl Stage for EqualizerStage {
    fn kind(&self) -> StageKind {
        StageKind::Equalizer
    }

    fn process(&mut self, block: &mut AudioBlock) -> Result<()> {
        self.refresh(block.sample_rate, block.channels);
        if self.filters.is_empty() {
            return Ok(());
        }
        for frame in block.samples.chunks_exact_mut(block.channels) {
            for (ch, s) in frame.iter_mut().enumerate() {
                let mut v = f64::from(*s);
                for f in &mut self.filters {
                    v = f.run(ch, v);
                }
                *s = v as f32;
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.filters.iter_mut().for_each(Biquad::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleEncoding;
    use crate::timeline::BufferTiming;

    fn sine_block(freq: f64, rate: u32, frames: usize) -> AudioBlock {
        let samples = (0..frames)
            .map(|i| (0.25 * (2.0 * PI * freq * i as f64 / f64::from(rate)).sin()) as f32)
            .collect();
        AudioBlock {
            raw: Vec::new(),
            encoding: SampleEncoding::S16Le,
            samples,
            channels: 1,
            sample_rate: rate,
            bit_depth: 16,
            timing: BufferTiming {
                pts_ns: 0,
                dts_ns: 0,
                duration_ns: 0,
            },
        }
    }

    fn rms(samples: &[f32]) -> f64 {
        let sum: f64 = samples.iter().map(|s| f64::from(*s).powi(2)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[test]
    fn neutral_bands_span_audible_range() {
        let bands = neutral_bands(10);
        assert_eq!(bands.len(), 10);
        assert!((bands[0].freq - 20.0).abs() < 1e-9);
        assert!((bands[9].freq - 20_000.0).abs() < 1e-6);
        assert!(bands.iter().all(|b| b.gain == 0.0));
    }

    #[test]
    fn load_fills_remaining_slots_flat_and_bumps_generation() {
        let bank = EqualizerBank::new();
        let g0 = bank.generation();
        bank.load(3, &[EqBandConfig::new(100.0, 50.0, 6.0)], true);
        assert_eq!(bank.num_bands(), 3);
        assert_eq!(bank.bands()[0].gain, 6.0);
        assert!(bank.bands()[1..].iter().all(|b| b.gain == 0.0));
        assert!(bank.generation() > g0);

        bank.load(3, &[EqBandConfig::new(100.0, 50.0, 6.0)], false);
        assert!(bank.bands().iter().all(|b| b.gain == 0.0));
    }

    #[test]
    fn flat_bank_is_transparent() {
        let bank = Arc::new(EqualizerBank::new());
        let mut stage = EqualizerStage::new(bank);
        let mut b = sine_block(1_000.0, 48_000, 512);
        let before = b.samples.clone();
        stage.process(&mut b).unwrap();
        assert_eq!(b.samples, before);
    }

    #[test]
    fn boost_raises_level_at_center_frequency() {
        let bank = Arc::new(EqualizerBank::new());
        bank.load(1, &[EqBandConfig::new(1_000.0, 1_000.0, 6.0)], true);
        let mut stage = EqualizerStage::new(bank);

        let mut b = sine_block(1_000.0, 48_000, 48_000);
        let before = rms(&b.samples[24_000..]);
        stage.process(&mut b).unwrap();
        let after = rms(&b.samples[24_000..]);
        // +6 dB is about a factor of 2.
        assert!((after / before - 2.0).abs() < 0.1, "ratio {}", after / before);
    }
}
