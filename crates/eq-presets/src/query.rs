//! Lookup, filtering and sorting over parsed presets.

use std::cmp::Ordering;
use std::str::FromStr;

use pcm_types::BandTarget;
use serde::Serialize;

use crate::convert::{BandConversion, DropReason, DroppedFilter, ShelfHandling, convert_filters};
use crate::model::{FilterEntry, OpraPreset, RawFilter};
use crate::store::{ATTRIBUTION, OPRA_REPO_URL};

/// Row for preset pickers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PresetSummary {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub creator: Option<String>,
}

pub fn preset_list(presets: &[OpraPreset]) -> Vec<PresetSummary> {
    presets
        .iter()
        .map(|p| PresetSummary {
            id: p.id.clone(),
            name: p.label().to_string(),
            manufacturer: p.manufacturer.clone(),
            creator: p.creator.clone(),
        })
        .collect()
}

fn normalized(text: Option<&str>) -> String {
    text.map(|t| t.trim().to_lowercase()).unwrap_or_default()
}

/// Find a preset by id, display name or name, ignoring case and outer whitespace.
pub fn find_preset<'a>(presets: &'a [OpraPreset], name: &str) -> Option<&'a OpraPreset> {
    let target = normalized(Some(name));
    if target.is_empty() {
        return None;
    }
    presets.iter().find(|p| {
        [&p.id, &p.display_name, &p.name]
            .into_iter()
            .any(|candidate| normalized(Some(candidate.as_str())) == target)
    })
}

/// Everything a detail view needs, including what conversion would drop.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PresetDetails {
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub creator: Option<String>,
    pub preamp_gain: Option<f64>,
    pub num_bands: usize,
    pub num_supported_bands: usize,
    pub num_dropped_filters: usize,
    pub dropped_filters: Vec<DroppedFilter>,
    pub unsupported_filters: Vec<DroppedFilter>,
    pub filters: Vec<RawFilter>,
    pub opra_repository: &'static str,
    pub attribution: &'static str,
}

pub fn preset_details(preset: &OpraPreset, shelf: ShelfHandling) -> PresetDetails {
    let conversion = convert_filters(&preset.filters, preset.label(), shelf, false);
    let unsupported_filters = conversion
        .dropped
        .iter()
        .filter(|d| d.reason == DropReason::UnsupportedShelf)
        .cloned()
        .collect();
    PresetDetails {
        name: preset.label().to_string(),
        description: preset.description.clone(),
        manufacturer: preset.manufacturer.clone(),
        model: preset.model.clone(),
        creator: preset.creator.clone(),
        preamp_gain: preset.preamp_gain,
        num_bands: preset.filters.len(),
        num_supported_bands: conversion.len(),
        num_dropped_filters: conversion.dropped.len(),
        unsupported_filters,
        dropped_filters: conversion.dropped,
        filters: preset
            .filters
            .iter()
            .filter_map(|f| match f {
                FilterEntry::Parametric(raw) => Some(raw.clone()),
                FilterEntry::Malformed(_) => None,
            })
            .collect(),
        opra_repository: OPRA_REPO_URL,
        attribution: ATTRIBUTION,
    }
}

pub fn filter_by_manufacturer(presets: &[OpraPreset], manufacturer: &str) -> Vec<OpraPreset> {
    filter_containing(presets, manufacturer, |p| p.manufacturer.as_deref())
}

pub fn filter_by_creator(presets: &[OpraPreset], creator: &str) -> Vec<OpraPreset> {
    filter_containing(presets, creator, |p| p.creator.as_deref())
}

fn filter_containing(
    presets: &[OpraPreset],
    needle: &str,
    field: impl Fn(&OpraPreset) -> Option<&str>,
) -> Vec<OpraPreset> {
    let target = normalized(Some(needle));
    presets
        .iter()
        .filter(|p| target.is_empty() || normalized(field(p)).contains(&target))
        .cloned()
        .collect()
}

/// Case-insensitive keyword search over display name, name and model.
pub fn search(presets: &[OpraPreset], keyword: &str) -> Vec<OpraPreset> {
    let target = normalized(Some(keyword));
    presets
        .iter()
        .filter(|p| {
            if target.is_empty() {
                return true;
            }
            let haystack = [
                normalized(Some(p.display_name.as_str())),
                normalized(Some(p.name.as_str())),
                normalized(p.model.as_deref()),
            ]
            .join(" ");
            haystack.contains(&target)
        })
        .cloned()
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Name,
    Manufacturer,
    Popularity,
}

impl FromStr for SortKey {
    type Err = std::convert::Infallible;

    /// Unknown keys sort by name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "manufacturer" => SortKey::Manufacturer,
            "popularity" => SortKey::Popularity,
            _ => SortKey::Name,
        })
    }
}

/// Stable sort. Missing popularity counts as zero.
pub fn sort_presets(presets: &mut [OpraPreset], key: SortKey, reverse: bool) {
    let name = |p: &OpraPreset| normalized(Some(p.label()));
    presets.sort_by(|a, b| {
        let ord = match key {
            SortKey::Name => name(a).cmp(&name(b)),
            SortKey::Manufacturer => normalized(a.manufacturer.as_deref())
                .cmp(&normalized(b.manufacturer.as_deref()))
                .then_with(|| name(a).cmp(&name(b))),
            SortKey::Popularity => {
                let pop = |p: &OpraPreset| p.popularity.unwrap_or(0.0);
                pop(a).partial_cmp(&pop(b)).unwrap_or(Ordering::Equal)
            }
        };
        if reverse { ord.reverse() } else { ord }
    });
}

/// Convert `preset` and load it into `target`, enabling the equalizer.
pub fn apply_preset(
    preset: &OpraPreset,
    shelf: ShelfHandling,
    target: &mut impl BandTarget,
) -> BandConversion {
    let conversion = convert_filters(&preset.filters, preset.label(), shelf, true);
    target.configure_bands(conversion.len(), &conversion.configs());
    target.set_enabled(true);
    tracing::info!(
        preset = preset.label(),
        bands = conversion.len(),
        dropped = conversion.dropped.len(),
        "applied EQ preset"
    );
    conversion
}

/// Look up `name` and apply it. Returns `None` when no preset matches.
pub fn apply_preset_by_name(
    presets: &[OpraPreset],
    name: &str,
    shelf: ShelfHandling,
    target: &mut impl BandTarget,
) -> Option<BandConversion> {
    match find_preset(presets, name) {
        Some(preset) => Some(apply_preset(preset, shelf, target)),
        None => {
            tracing::warn!(preset = name, "unable to apply preset: not found");
            None
        }
    }
}
