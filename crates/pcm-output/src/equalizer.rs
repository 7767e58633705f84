//! Equalizer configuration that outlives individual graphs.

use std::sync::Arc;

use pcm_types::{
    BandTarget, EQ_MAX_BANDS, EQ_MAX_FREQ_HZ, EQ_MAX_GAIN_DB, EQ_MIN_BANDS, EQ_MIN_FREQ_HZ,
    EQ_MIN_GAIN_DB, EqBandConfig, EqualizerState,
};

use crate::stages::equalizer::EqualizerBank;

/// Stores the band layout and enabled flag, and mirrors them onto the live graph's bank.
///
/// The stored `band_configs` are never modified by enabling or disabling; disabling only
/// zeroes the gains of the live slots.
#[derive(Debug, Default)]
pub struct EqualizerController {
    state: EqualizerState,
    live: Option<Arc<EqualizerBank>>,
}

/// Check one band, or `None` if it cannot be used. Out-of-range values, infinite ones
/// included, are clamped; only non-positive or NaN frequency and bandwidth and a NaN gain
/// reject the band.
fn validate_band(index: usize, band: &EqBandConfig) -> Option<EqBandConfig> {
    if !(band.freq > 0.0) || !(band.bandwidth > 0.0) || band.gain.is_nan() {
        tracing::warn!(
            index,
            freq = band.freq,
            bandwidth = band.bandwidth,
            gain = band.gain,
            "rejecting invalid equalizer band"
        );
        return None;
    }

    let freq = band.freq.clamp(EQ_MIN_FREQ_HZ, EQ_MAX_FREQ_HZ);
    let bandwidth = band.bandwidth.min(EQ_MAX_FREQ_HZ);
    let gain = band.gain.clamp(EQ_MIN_GAIN_DB, EQ_MAX_GAIN_DB);
    if freq != band.freq || bandwidth != band.bandwidth || gain != band.gain {
        tracing::debug!(
            index,
            freq,
            bandwidth,
            gain,
            "equalizer band clamped into range"
        );
    }
    Some(EqBandConfig::new(freq, bandwidth, gain))
}

impl EqualizerController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the band layout.
    ///
    /// `num_bands` is clamped into `[1, 64]`; at most that many configs are examined,
    /// invalid ones are skipped and the rest keep their order.
    pub fn configure_bands(&mut self, num_bands: usize, configs: &[EqBandConfig]) {
        let clamped = num_bands.clamp(EQ_MIN_BANDS, EQ_MAX_BANDS);
        if clamped != num_bands {
            tracing::warn!(requested = num_bands, using = clamped, "equalizer band count out of range");
        }

        let bands: Vec<EqBandConfig> = configs
            .iter()
            .take(clamped)
            .enumerate()
            .filter_map(|(i, b)| validate_band(i, b))
            .collect();

        self.state.num_bands = clamped;
        self.state.band_configs = bands;
        tracing::debug!(
            num_bands = clamped,
            configured = self.state.band_configs.len(),
            "equalizer bands configured"
        );
        self.apply();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
        tracing::debug!(enabled, "equalizer toggled");
        self.apply();
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    /// Snapshot of the stored configuration.
    pub fn get_state(&self) -> EqualizerState {
        self.state.clone()
    }

    /// Bind to a new graph's bank and push the stored state onto it.
    pub fn attach(&mut self, bank: Arc<EqualizerBank>) {
        self.live = Some(bank);
        self.apply();
    }

    pub fn detach(&mut self) {
        self.live = None;
    }

    fn apply(&self) {
        let Some(bank) = &self.live else {
            return;
        };
        bank.load(self.state.num_bands, &self.state.band_configs, self.state.enabled);
    }
}

impl BandTarget for EqualizerController {
    fn configure_bands(&mut self, num_bands: usize, configs: &[EqBandConfig]) {
        EqualizerController::configure_bands(self, num_bands, configs);
    }

    fn set_enabled(&mut self, enabled: bool) {
        EqualizerController::set_enabled(self, enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfgs() -> Vec<EqBandConfig> {
        vec![
            EqBandConfig::new(100.0, 70.0, 3.0),
            EqBandConfig::new(1_000.0, 700.0, -4.5),
            EqBandConfig::new(8_000.0, 4_000.0, 6.0),
        ]
    }

    #[test]
    fn band_count_clamps_to_limits() {
        let mut eq = EqualizerController::new();
        eq.configure_bands(100, &[]);
        assert_eq!(eq.get_state().num_bands, 64);
        eq.configure_bands(0, &[]);
        assert_eq!(eq.get_state().num_bands, 1);
    }

    #[test]
    fn gain_and_frequency_clamp() {
        let mut eq = EqualizerController::new();
        eq.configure_bands(
            2,
            &[
                EqBandConfig::new(1_000.0, 100.0, 20.0),
                EqBandConfig::new(30_000.0, 100.0, 0.0),
            ],
        );
        let state = eq.get_state();
        assert_eq!(state.band_configs[0].gain, 12.0);
        assert_eq!(state.band_configs[1].freq, 20_000.0);
    }

    #[test]
    fn infinite_gain_clamps_to_range_bounds() {
        let mut eq = EqualizerController::new();
        eq.configure_bands(
            3,
            &[
                EqBandConfig::new(100.0, 50.0, f64::INFINITY),
                EqBandConfig::new(200.0, 50.0, f64::NEG_INFINITY),
                EqBandConfig::new(300.0, 50.0, f64::NAN),
            ],
        );
        let gains: Vec<f64> = eq.get_state().band_configs.iter().map(|b| b.gain).collect();
        assert_eq!(gains, vec![12.0, -24.0]);
    }

    #[test]
    fn invalid_bands_are_skipped_in_order() {
        let mut eq = EqualizerController::new();
        eq.configure_bands(
            4,
            &[
                EqBandConfig::new(0.0, 10.0, 1.0),
                EqBandConfig::new(200.0, 50.0, 1.0),
                EqBandConfig::new(300.0, -5.0, 1.0),
                EqBandConfig::new(400.0, 50.0, 2.0),
            ],
        );
        let freqs: Vec<f64> = eq.get_state().band_configs.iter().map(|b| b.freq).collect();
        assert_eq!(freqs, vec![200.0, 400.0]);
    }

    #[test]
    fn configs_beyond_band_count_are_ignored() {
        let mut eq = EqualizerController::new();
        eq.configure_bands(2, &cfgs());
        assert_eq!(eq.get_state().band_configs.len(), 2);
    }

    #[test]
    fn enable_disable_round_trip_keeps_stored_gains() {
        let mut eq = EqualizerController::new();
        let bank = Arc::new(EqualizerBank::new());
        eq.attach(bank.clone());
        eq.configure_bands(3, &cfgs());
        eq.set_enabled(true);
        assert_eq!(bank.bands()[2].gain, 6.0);

        eq.set_enabled(false);
        assert!(bank.bands().iter().all(|b| b.gain == 0.0));
        assert_eq!(eq.get_state().band_configs, cfgs());

        eq.set_enabled(true);
        assert_eq!(eq.get_state().band_configs, cfgs());
        assert_eq!(bank.bands(), cfgs());
    }

    #[test]
    fn shorter_layout_resets_remaining_live_slots() {
        let mut eq = EqualizerController::new();
        let bank = Arc::new(EqualizerBank::new());
        eq.attach(bank.clone());
        eq.set_enabled(true);
        eq.configure_bands(3, &cfgs());
        eq.configure_bands(3, &cfgs()[..1]);
        let live = bank.bands();
        assert_eq!(live[0], cfgs()[0]);
        assert_eq!(live[1].gain, 0.0);
        assert_eq!(live[2].gain, 0.0);
    }

    #[test]
    fn attach_applies_stored_state() {
        let mut eq = EqualizerController::new();
        eq.configure_bands(3, &cfgs());
        eq.set_enabled(true);
        let bank = Arc::new(EqualizerBank::new());
        eq.attach(bank.clone());
        assert_eq!(bank.num_bands(), 3);
        assert_eq!(bank.bands(), cfgs());
    }

    #[test]
    fn state_snapshot_is_a_copy() {
        let mut eq = EqualizerController::new();
        eq.configure_bands(3, &cfgs());
        let mut snap = eq.get_state();
        snap.band_configs.clear();
        assert_eq!(eq.get_state().band_configs.len(), 3);
    }
}
