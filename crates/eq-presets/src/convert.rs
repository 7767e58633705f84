//! Parametric filter to peaking band conversion.
//!
//! The equalizer only has peaking bands. Shelves are approximated as peaking bands at the
//! shelf corner (or dropped, depending on [`ShelfHandling`]); every filter that cannot be
//! converted is reported with a reason instead of disappearing.

use pcm_types::{EQ_MAX_FREQ_HZ, EQ_MAX_GAIN_DB, EQ_MIN_FREQ_HZ, EQ_MIN_GAIN_DB, EqBandConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{FilterEntry, OpraPreset, RawFilter};

/// Q used for shelves that do not publish one.
pub const SHELF_APPROX_Q: f64 = 0.7;
/// Gain multiplier applied to approximated shelves.
pub const SHELF_APPROX_GAIN_SCALE: f64 = 1.0;

const PEAK_TYPES: [&str; 4] = ["peak", "peak/dip", "peaking", "dip"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShelfHandling {
    #[default]
    Approximate,
    Drop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    InvalidFilter,
    IncompleteShelf,
    UnsupportedShelf,
    Incomplete,
    InvalidQ,
    InvalidBandwidth,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::InvalidFilter => "invalid_filter",
            DropReason::IncompleteShelf => "incomplete_shelf",
            DropReason::UnsupportedShelf => "unsupported_shelf",
            DropReason::Incomplete => "incomplete",
            DropReason::InvalidQ => "invalid_q",
            DropReason::InvalidBandwidth => "invalid_bandwidth",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filter that produced no band, with the values it was published with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DroppedFilter {
    pub frequency: Option<f64>,
    pub gain: Option<f64>,
    #[serde(rename = "Q")]
    pub q: Option<f64>,
    #[serde(rename = "type")]
    pub filter_type: Option<String>,
    pub reason: DropReason,
    /// Original entry when it was not a filter object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl DroppedFilter {
    fn described(filter: &RawFilter, reason: DropReason) -> Self {
        Self {
            frequency: filter.frequency,
            gain: filter.gain,
            q: filter.q,
            filter_type: filter.filter_type.clone(),
            reason,
            raw: None,
        }
    }

    fn malformed(raw: &Value) -> Self {
        Self {
            frequency: None,
            gain: None,
            q: None,
            filter_type: None,
            reason: DropReason::InvalidFilter,
            raw: Some(raw.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandOrigin {
    Peaking,
    ApproximatedShelf,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvertedBand {
    #[serde(flatten)]
    pub config: EqBandConfig,
    pub origin: BandOrigin,
}

/// Bands in filter order plus everything that was dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BandConversion {
    pub bands: Vec<ConvertedBand>,
    pub dropped: Vec<DroppedFilter>,
}

impl BandConversion {
    pub fn configs(&self) -> Vec<EqBandConfig> {
        self.bands.iter().map(|b| b.config).collect()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

pub fn is_shelf(filter_type: Option<&str>) -> bool {
    let normalized = filter_type.map(|t| t.trim().to_lowercase()).unwrap_or_default();
    !normalized.is_empty() && (normalized.contains("shelf") || normalized == "lshelf" || normalized == "hshelf")
}

/// Convert a preset's filters with default shelf handling, logging skipped filters.
pub fn convert(preset: &OpraPreset) -> BandConversion {
    convert_filters(&preset.filters, preset.label(), ShelfHandling::default(), true)
}

/// Convert `filters` for the preset called `name`.
///
/// `log_warnings` controls warnings for skipped or clamped filters; detail for every
/// dropped filter is logged through the diagnostic channel either way.
pub fn convert_filters(
    filters: &[FilterEntry],
    name: &str,
    shelf: ShelfHandling,
    log_warnings: bool,
) -> BandConversion {
    let mut out = BandConversion::default();
    for entry in filters {
        let filter = match entry {
            FilterEntry::Parametric(filter) => filter,
            FilterEntry::Malformed(raw) => {
                if log_warnings {
                    tracing::warn!(preset = name, entry = %raw, "invalid filter entry");
                }
                out.dropped.push(DroppedFilter::malformed(raw));
                continue;
            }
        };
        match convert_one(filter, name, shelf, log_warnings) {
            Ok(band) => out.bands.push(band),
            Err(reason) => out.dropped.push(DroppedFilter::described(filter, reason)),
        }
    }
    for dropped in &out.dropped {
        pcm_types::verbose!(
            preset = name,
            reason = %dropped.reason,
            frequency = ?dropped.frequency,
            gain = ?dropped.gain,
            q = ?dropped.q,
            filter_type = ?dropped.filter_type,
            "dropped filter"
        );
    }
    out
}

fn convert_one(
    filter: &RawFilter,
    name: &str,
    shelf: ShelfHandling,
    log_warnings: bool,
) -> Result<ConvertedBand, DropReason> {
    let freq = filter.frequency;
    let mut gain = filter.gain;
    let mut q = filter.q;
    let mut origin = BandOrigin::Peaking;

    if is_shelf(filter.filter_type.as_deref()) {
        if shelf == ShelfHandling::Drop {
            if log_warnings {
                tracing::warn!(preset = name, ?filter, "skipping unsupported shelf filter");
            }
            return Err(DropReason::UnsupportedShelf);
        }
        let (Some(_), Some(g)) = (freq, gain) else {
            if log_warnings {
                tracing::warn!(preset = name, ?filter, "skipping shelf band with missing data");
            }
            return Err(DropReason::IncompleteShelf);
        };
        q = q.or(Some(SHELF_APPROX_Q));
        gain = Some(g * SHELF_APPROX_GAIN_SCALE);
        origin = BandOrigin::ApproximatedShelf;
    }

    let (Some(f), Some(g), Some(q)) = (freq, gain, q) else {
        if log_warnings {
            tracing::warn!(preset = name, ?filter, "skipping incomplete band");
        }
        return Err(DropReason::Incomplete);
    };
    if q <= 0.0 {
        if log_warnings {
            tracing::warn!(preset = name, q, "skipping non-positive Q");
        }
        return Err(DropReason::InvalidQ);
    }

    if origin == BandOrigin::Peaking {
        if let Some(kind) = filter.filter_type.as_deref() {
            let kind = kind.trim().to_lowercase();
            if !kind.is_empty() && !PEAK_TYPES.contains(&kind.as_str()) {
                tracing::debug!(preset = name, filter_type = %kind, "non-peak filter converted as peak");
            }
        }
    }

    let freq = if (EQ_MIN_FREQ_HZ..=EQ_MAX_FREQ_HZ).contains(&f) {
        f
    } else {
        if log_warnings {
            tracing::warn!(preset = name, freq = f, "band frequency out of range");
        }
        f.clamp(EQ_MIN_FREQ_HZ, EQ_MAX_FREQ_HZ)
    };
    let gain = if (EQ_MIN_GAIN_DB..=EQ_MAX_GAIN_DB).contains(&g) {
        g
    } else {
        if log_warnings {
            tracing::warn!(preset = name, gain = g, "band gain out of range");
        }
        g.clamp(EQ_MIN_GAIN_DB, EQ_MAX_GAIN_DB)
    };

    let mut bandwidth = freq / q;
    if bandwidth.is_nan() || bandwidth <= 0.0 {
        if log_warnings {
            tracing::warn!(preset = name, bandwidth, "invalid band bandwidth");
        }
        return Err(DropReason::InvalidBandwidth);
    }
    if bandwidth > EQ_MAX_FREQ_HZ {
        tracing::debug!(preset = name, bandwidth, "clamping band bandwidth");
        bandwidth = EQ_MAX_FREQ_HZ;
    }

    Ok(ConvertedBand {
        config: EqBandConfig::new(freq, bandwidth, gain),
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(frequency: Option<f64>, gain: Option<f64>, q: Option<f64>, kind: &str) -> FilterEntry {
        FilterEntry::Parametric(RawFilter {
            frequency,
            gain,
            q,
            filter_type: Some(kind.to_string()).filter(|k| !k.is_empty()),
        })
    }

    fn run(filters: &[FilterEntry]) -> BandConversion {
        convert_filters(filters, "test", ShelfHandling::Approximate, false)
    }

    #[test]
    fn peak_filter_becomes_band() {
        let out = run(&[filter(Some(1000.0), Some(-3.0), Some(2.0), "PK")]);
        assert!(out.dropped.is_empty());
        assert_eq!(out.configs(), vec![EqBandConfig::new(1000.0, 500.0, -3.0)]);
        assert_eq!(out.bands[0].origin, BandOrigin::Peaking);
    }

    #[test]
    fn shelf_without_q_is_approximated() {
        let out = run(&[filter(Some(100.0), Some(-6.0), None, "lowshelf")]);
        assert_eq!(out.len(), 1);
        let band = out.bands[0];
        assert_eq!(band.origin, BandOrigin::ApproximatedShelf);
        assert_eq!(band.config.freq, 100.0);
        assert_eq!(band.config.gain, -6.0);
        assert!((band.config.bandwidth - 100.0 / 0.7).abs() < 1e-9);
    }

    #[test]
    fn shelf_missing_gain_is_incomplete_shelf() {
        let out = run(&[filter(Some(100.0), None, Some(0.7), "HSHELF")]);
        assert!(out.is_empty());
        assert_eq!(out.dropped[0].reason, DropReason::IncompleteShelf);
    }

    #[test]
    fn drop_mode_rejects_shelves() {
        let out = convert_filters(
            &[filter(Some(100.0), Some(3.0), Some(0.7), "high_shelf")],
            "test",
            ShelfHandling::Drop,
            false,
        );
        assert_eq!(out.dropped[0].reason, DropReason::UnsupportedShelf);
    }

    #[test]
    fn missing_fields_and_bad_q_are_dropped() {
        let out = run(&[
            filter(Some(100.0), None, Some(1.0), "peak"),
            filter(Some(100.0), Some(1.0), Some(0.0), "peak"),
            filter(Some(100.0), Some(1.0), Some(-1.0), ""),
        ]);
        assert!(out.is_empty());
        let reasons: Vec<_> = out.dropped.iter().map(|d| d.reason).collect();
        assert_eq!(reasons, vec![DropReason::Incomplete, DropReason::InvalidQ, DropReason::InvalidQ]);
        assert_eq!(out.dropped[0].frequency, Some(100.0));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let out = run(&[filter(Some(5.0), Some(20.0), Some(1.0), "peak"), filter(Some(30_000.0), Some(-40.0), Some(1.0), "peak")]);
        let configs = out.configs();
        assert_eq!(configs[0].freq, 20.0);
        assert_eq!(configs[0].gain, 12.0);
        assert_eq!(configs[0].bandwidth, 20.0);
        assert_eq!(configs[1].freq, 20_000.0);
        assert_eq!(configs[1].gain, -24.0);
    }

    #[test]
    fn wide_bandwidth_is_clamped_not_dropped() {
        let out = run(&[filter(Some(10_000.0), Some(1.0), Some(0.1), "peak")]);
        assert_eq!(out.configs()[0].bandwidth, 20_000.0);
    }

    #[test]
    fn malformed_entries_keep_raw_value() {
        let out = run(&[FilterEntry::Malformed(json!("junk")), filter(Some(50.0), Some(1.0), Some(1.0), "peak")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out.dropped[0].reason, DropReason::InvalidFilter);
        assert_eq!(out.dropped[0].raw, Some(json!("junk")));
    }

    #[test]
    fn shelf_detection() {
        assert!(is_shelf(Some("LowShelf")));
        assert!(is_shelf(Some("lshelf")));
        assert!(!is_shelf(Some("peak")));
        assert!(!is_shelf(None));
    }

    #[test]
    fn drop_reasons_serialize_snake_case() {
        assert_eq!(serde_json::to_value(DropReason::InvalidBandwidth).unwrap(), json!("invalid_bandwidth"));
    }
}
