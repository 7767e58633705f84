//! `presets` subcommands.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use eq_presets::{
    BandConversion, OpraPreset, PresetDetails, PresetStore, SortKey, StoreConfig, convert_filters,
    filter_by_creator, filter_by_manufacturer, find_preset, preset_details, search, sort_presets,
};

use crate::cli::PresetsCommand;

fn open(config: &StoreConfig, offline: bool) -> Arc<Vec<OpraPreset>> {
    let store = PresetStore::new(config.clone());
    if offline {
        store.load_cached()
    } else {
        store.load(false)
    }
}

fn print_rows(presets: &[OpraPreset], limit: Option<usize>) {
    let shown = limit.unwrap_or(presets.len()).min(presets.len());
    for p in &presets[..shown] {
        let maker = p.manufacturer.as_deref().unwrap_or("-");
        println!("{:<48} {:<20} {}", p.label(), maker, p.id);
    }
    if shown < presets.len() {
        println!("... {} more", presets.len() - shown);
    }
}

pub fn run(cmd: PresetsCommand, config: &StoreConfig) -> Result<()> {
    match cmd {
        PresetsCommand::List {
            manufacturer,
            creator,
            sort,
            reverse,
            limit,
            offline,
        } => {
            let all = open(config, offline);
            let mut presets = all.as_ref().clone();
            if let Some(m) = manufacturer.as_deref() {
                presets = filter_by_manufacturer(&presets, m);
            }
            if let Some(c) = creator.as_deref() {
                presets = filter_by_creator(&presets, c);
            }
            let key: SortKey = sort.parse().unwrap_or_default();
            sort_presets(&mut presets, key, reverse);
            print_rows(&presets, limit);
        }
        PresetsCommand::Search {
            keyword,
            limit,
            offline,
        } => {
            let all = open(config, offline);
            let mut presets = search(&all, &keyword);
            sort_presets(&mut presets, SortKey::Name, false);
            print_rows(&presets, limit);
        }
        PresetsCommand::Show { name, json, offline } => {
            let all = open(config, offline);
            let preset = find_preset(&all, &name).ok_or_else(|| anyhow!("no preset named {name:?}"))?;
            let details = preset_details(preset, config.shelf_handling);
            if json {
                println!("{}", serde_json::to_string_pretty(&details)?);
            } else {
                print!("{}", describe(&details));
            }
        }
        PresetsCommand::Apply { name, offline } => {
            let all = open(config, offline);
            let preset = find_preset(&all, &name).ok_or_else(|| anyhow!("no preset named {name:?}"))?;
            let conversion = convert_filters(&preset.filters, preset.label(), config.shelf_handling, true);
            print!("{}", equalizer_table(preset.label(), &conversion));
        }
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}

/// Plain-text detail view.
pub fn describe(d: &PresetDetails) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", d.name);
    for (label, value) in [
        ("manufacturer", &d.manufacturer),
        ("model", &d.model),
        ("creator", &d.creator),
        ("description", &d.description),
    ] {
        if let Some(value) = value {
            let _ = writeln!(out, "  {label}: {value}");
        }
    }
    if let Some(preamp) = d.preamp_gain {
        let _ = writeln!(out, "  preamp: {preamp:.2} dB");
    }
    let _ = writeln!(
        out,
        "  filters: {} ({} supported, {} dropped)",
        d.num_bands, d.num_supported_bands, d.num_dropped_filters
    );
    for f in &d.filters {
        let _ = writeln!(
            out,
            "    {:>9} Hz {:>7} dB  Q {:>5}  {}",
            fmt_opt(f.frequency),
            fmt_opt(f.gain),
            fmt_opt(f.q),
            f.filter_type.as_deref().unwrap_or("")
        );
    }
    if !d.dropped_filters.is_empty() {
        let _ = writeln!(out, "  dropped:");
        for f in &d.dropped_filters {
            let _ = writeln!(out, "    {:>9} Hz  {}", fmt_opt(f.frequency), f.reason);
        }
    }
    let _ = writeln!(out, "\n{}\n{}", d.attribution, d.opra_repository);
    out
}

/// An `[equalizer]` table holding the converted bands, ready for the config file.
pub fn equalizer_table(label: &str, conversion: &BandConversion) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# {label}: {} bands, {} filters dropped",
        conversion.len(),
        conversion.dropped.len()
    );
    let _ = writeln!(out, "[equalizer]");
    let _ = writeln!(out, "enabled = true");
    let _ = writeln!(out, "num_bands = {}", conversion.len().max(1));
    let _ = writeln!(out, "bands = [");
    for band in conversion.configs() {
        let _ = writeln!(
            out,
            "    {{ freq = {:.3}, bandwidth = {:.3}, gain = {:.3} }},",
            band.freq, band.bandwidth, band.gain
        );
    }
    let _ = writeln!(out, "]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use eq_presets::{ShelfHandling, parse_records};

    fn sample() -> OpraPreset {
        parse_records([
            r#"{"name":"Warm","manufacturer":"Acme","filters":[{"type":"lowshelf","frequency":105,"gain":4},{"frequency":2000,"gain":-1.5,"Q":2},{"frequency":50}]}"#,
        ])
        .remove(0)
    }

    #[test]
    fn equalizer_table_parses_back_as_config() {
        let preset = sample();
        let conversion = convert_filters(&preset.filters, preset.label(), ShelfHandling::Approximate, false);
        let table = equalizer_table(preset.label(), &conversion);
        let cfg: BridgeConfig = toml::from_str(&table).unwrap();
        let eq = cfg.equalizer.unwrap();
        assert_eq!(eq.enabled, Some(true));
        assert_eq!(eq.num_bands, Some(2));
        let bands = eq.bands.unwrap();
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[1].freq, 2000.0);
        assert_eq!(bands[1].bandwidth, 1000.0);
        assert_eq!(bands[1].gain, -1.5);
    }

    #[test]
    fn describe_lists_dropped_filters_and_attribution() {
        let details = preset_details(&sample(), ShelfHandling::Drop);
        let text = describe(&details);
        assert!(text.starts_with("Warm\n"));
        assert!(text.contains("manufacturer: Acme"));
        assert!(text.contains("filters: 3 (1 supported, 2 dropped)"));
        assert!(text.contains("unsupported_shelf"));
        assert!(text.contains("incomplete"));
        assert!(text.contains("CC BY-SA 4.0"));
    }
}
