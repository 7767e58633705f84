//! Normalized preset records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parametric filter as published, numeric fields already coerced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFilter {
    pub frequency: Option<f64>,
    pub gain: Option<f64>,
    #[serde(rename = "Q")]
    pub q: Option<f64>,
    #[serde(rename = "type")]
    pub filter_type: Option<String>,
}

/// A filter list entry. Entries that are not objects are kept so conversion can report them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterEntry {
    Parametric(RawFilter),
    Malformed(Value),
}

/// A preset from either database schema, normalized to one shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpraPreset {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub creator: Option<String>,
    pub description: Option<String>,
    pub filters: Vec<FilterEntry>,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,
    /// Global preamp of relational EQ records (dB).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamp_gain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq_type: Option<String>,
}

impl OpraPreset {
    /// Display name, falling back to name then id.
    pub fn label(&self) -> &str {
        [&self.display_name, &self.name, &self.id]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("Unknown Preset")
    }
}
