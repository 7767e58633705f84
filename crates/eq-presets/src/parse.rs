//! JSONL preset database parsing.
//!
//! Two record layouts share one file. Flat records carry a whole preset inline. Relational
//! records are split into `vendor`, `product` and `eq` entries that are joined by id once
//! every line has been read; joined presets follow the flat ones in the output.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::model::{FilterEntry, OpraPreset, RawFilter};

const UNKNOWN_PRESET: &str = "Unknown Preset";
const DETAILS_PREFIX: &str = "measured by ";

/// Parse every line of an open database. Bad lines are logged and skipped.
pub fn parse_reader(reader: impl BufRead) -> Vec<OpraPreset> {
    let mut lines = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        match line {
            Ok(line) => lines.push(line),
            Err(err) => {
                tracing::warn!(line = idx + 1, error = %err, "stopped reading preset database");
                break;
            }
        }
    }
    parse_records(lines.iter().map(String::as_str))
}

pub fn parse_file(path: &Path) -> Result<Vec<OpraPreset>> {
    let file = File::open(path).with_context(|| format!("open preset database {:?}", path))?;
    Ok(parse_reader(BufReader::new(file)))
}

/// Parse database lines into normalized presets.
pub fn parse_records<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<OpraPreset> {
    let mut presets = Vec::new();
    let mut joins = RelationalIndex::default();

    for (idx, line) in lines.into_iter().enumerate() {
        let line_number = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let payload: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(line = line_number, error = %err, "failed to parse preset line");
                continue;
            }
        };
        let Value::Object(record) = payload else {
            tracing::warn!(line = line_number, "skipping non-object preset entry");
            continue;
        };
        if !joins.collect(&record) {
            presets.push(normalize_flat(&record));
        }
    }

    presets.extend(joins.resolve());
    presets
}

/// Vendor, product and eq records waiting to be joined.
#[derive(Default)]
struct RelationalIndex {
    vendors: HashMap<String, String>,
    products: HashMap<String, Map<String, Value>>,
    eqs: Vec<Map<String, Value>>,
}

impl RelationalIndex {
    /// Take `record` if it is relational. Returns `false` for flat records.
    fn collect(&mut self, record: &Map<String, Value>) -> bool {
        let Some(Value::Object(data)) = record.get("data") else {
            return false;
        };
        match record.get("type").and_then(Value::as_str) {
            Some("vendor") => {
                let id = record.get("id").and_then(value_text);
                let name = data.get("name").and_then(value_text);
                if let (Some(id), Some(name)) = (id, name) {
                    self.vendors.insert(id, name);
                }
            }
            Some("product") => {
                if let Some(id) = record.get("id").and_then(value_text) {
                    self.products.insert(id, data.clone());
                }
            }
            Some("eq") => self.eqs.push(record.clone()),
            _ => return false,
        }
        true
    }

    fn resolve(self) -> Vec<OpraPreset> {
        self.eqs
            .iter()
            .map(|entry| normalize_eq_entry(entry, &self.products, &self.vendors))
            .collect()
    }
}

/// Normalize a flat preset record.
pub fn normalize_flat(entry: &Map<String, Value>) -> OpraPreset {
    let name = first_text(entry, &["name", "title"]);
    let manufacturer = first_text(entry, &["manufacturer", "brand", "vendor", "make"]);
    let model = first_text(entry, &["model", "device", "product"]);
    let creator = first_text(entry, &["creator", "author", "source"]);
    let description = first_text(entry, &["description", "notes"]);

    let display_name = display_name(
        name.as_deref().or(model.as_deref()),
        manufacturer.as_deref(),
        model.as_deref(),
        creator.as_deref(),
    );

    let filters = match ["filters", "bands", "eq"]
        .iter()
        .filter_map(|key| entry.get(*key))
        .find(|v| !is_empty_value(v))
    {
        Some(Value::Array(items)) => normalize_filters(items, &display_name),
        Some(_) => {
            tracing::warn!(preset = %display_name, "invalid filter list");
            Vec::new()
        }
        None => Vec::new(),
    };

    let id = first_text(entry, &["id", "identifier"]).unwrap_or_else(|| display_name.clone());
    OpraPreset {
        id,
        name: name
            .clone()
            .or_else(|| model.clone())
            .unwrap_or_else(|| display_name.clone()),
        model: model.or(name),
        manufacturer,
        creator,
        description,
        filters,
        display_name,
        popularity: entry.get("popularity").and_then(coerce_f64),
        preamp_gain: None,
        eq_type: None,
    }
}

fn normalize_eq_entry(
    entry: &Map<String, Value>,
    products: &HashMap<String, Map<String, Value>>,
    vendors: &HashMap<String, String>,
) -> OpraPreset {
    let empty = Map::new();
    let data = match entry.get("data") {
        Some(Value::Object(data)) => data,
        _ => &empty,
    };

    let mut vendor_id = None;
    let mut product_name = None;
    if let Some(product_id) = data.get("product_id").and_then(Value::as_str) {
        if let Some(product) = products.get(product_id) {
            product_name = product.get("name").and_then(value_text);
            vendor_id = product.get("vendor_id").and_then(value_text);
        }
        let (parsed_vendor, parsed_model) = split_product_id(product_id);
        vendor_id = vendor_id.or(parsed_vendor);
        product_name = product_name.or(parsed_model);
    }

    let manufacturer = vendor_id
        .as_ref()
        .map(|id| vendors.get(id).cloned().unwrap_or_else(|| id.clone()));
    let author = data.get("author").and_then(value_text);
    let details = data.get("details").and_then(value_text);
    let display_name = relational_display_name(
        manufacturer.as_deref(),
        product_name.as_deref(),
        details.as_deref(),
    );

    let parameters = match data.get("parameters") {
        Some(Value::Object(p)) => Some(p),
        _ => None,
    };
    let filters = match parameters.and_then(|p| p.get("bands")) {
        Some(Value::Array(items)) => normalize_filters(items, &display_name),
        Some(v) if !is_empty_value(v) => {
            tracing::warn!(preset = %display_name, "invalid filter list");
            Vec::new()
        }
        _ => Vec::new(),
    };

    OpraPreset {
        id: entry
            .get("id")
            .and_then(value_text)
            .unwrap_or_else(|| display_name.clone()),
        name: display_name.clone(),
        manufacturer,
        model: product_name,
        creator: author,
        description: details,
        filters,
        display_name,
        popularity: None,
        preamp_gain: parameters
            .and_then(|p| p.get("gain_db"))
            .and_then(coerce_f64),
        eq_type: data.get("type").and_then(value_text),
    }
}

fn normalize_filters(items: &[Value], preset: &str) -> Vec<FilterEntry> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(fields) => FilterEntry::Parametric(normalize_filter(fields)),
            other => {
                tracing::warn!(preset, entry = %other, "invalid filter entry");
                FilterEntry::Malformed(other.clone())
            }
        })
        .collect()
}

/// Coerce a filter object's aliased fields. A present zero is kept.
pub fn normalize_filter(fields: &Map<String, Value>) -> RawFilter {
    let number = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| fields.get(*key))
            .find(|v| !v.is_null())
            .and_then(coerce_f64)
    };
    RawFilter {
        frequency: number(&["frequency", "freq"]),
        gain: number(&["gain", "gain_db", "db"]),
        q: number(&["Q", "q"]),
        filter_type: first_text(fields, &["type", "filter_type"]),
    }
}

/// Split `vendor::model` product ids. Ids without a separator are model-only.
pub fn split_product_id(product_id: &str) -> (Option<String>, Option<String>) {
    let (vendor, model) = product_id.split_once("::").unwrap_or(("", product_id));
    let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    (non_empty(vendor), non_empty(model))
}

/// Flat display name: name, else de-duplicated `manufacturer model`, plus a creator suffix
/// unless the base already mentions the creator.
pub fn display_name(
    name: Option<&str>,
    manufacturer: Option<&str>,
    model: Option<&str>,
    creator: Option<&str>,
) -> String {
    let mut base = name.map(str::trim).unwrap_or_default().to_string();
    if base.is_empty() {
        let mut parts: Vec<&str> = Vec::new();
        for part in [manufacturer, model].into_iter().flatten().map(str::trim) {
            if !part.is_empty() && !parts.contains(&part) {
                parts.push(part);
            }
        }
        base = parts.join(" ");
    }
    if base.is_empty() {
        base = UNKNOWN_PRESET.to_string();
    }
    if let Some(creator) = creator.map(str::trim).filter(|c| !c.is_empty()) {
        if !base.to_lowercase().contains(&creator.to_lowercase()) {
            base = format!("{base} - {creator}");
        }
    }
    base
}

fn relational_display_name(
    manufacturer: Option<&str>,
    model: Option<&str>,
    details: Option<&str>,
) -> String {
    let parts: Vec<&str> = [manufacturer, model]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let base = if parts.is_empty() {
        UNKNOWN_PRESET.to_string()
    } else {
        parts.join(" ")
    };
    match details.map(clean_details).filter(|d| !d.is_empty()) {
        Some(details) => format!("{base} - {details}"),
        None => base,
    }
}

fn clean_details(details: &str) -> String {
    let text = details.trim();
    let lower = text.to_lowercase();
    if lower.starts_with(DETAILS_PREFIX) && text.is_char_boundary(DETAILS_PREFIX.len()) {
        text[DETAILS_PREFIX.len()..].trim().to_string()
    } else {
        text.to_string()
    }
}

/// A finite number from a JSON number or numeric string.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Text form of a scalar; blank strings count as absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn first_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find_map(value_text)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
