//! OPRA equalizer presets: database cache, parsing, and conversion into peaking bands.
//!
//! ```no_run
//! use eq_presets::{PresetStore, StoreConfig, find_preset};
//!
//! let store = PresetStore::new(StoreConfig::default());
//! let presets = store.load(false);
//! if let Some(preset) = find_preset(&presets, "Sennheiser HD 600") {
//!     println!("{} filters", preset.filters.len());
//! }
//! ```

pub mod convert;
pub mod model;
pub mod parse;
pub mod query;
pub mod store;

pub use convert::{BandConversion, BandOrigin, DropReason, DroppedFilter, ShelfHandling, convert, convert_filters};
pub use model::{FilterEntry, OpraPreset, RawFilter};
pub use parse::{parse_file, parse_reader, parse_records};
pub use query::{
    PresetDetails, PresetSummary, SortKey, apply_preset, apply_preset_by_name, filter_by_creator,
    filter_by_manufacturer, find_preset, preset_details, preset_list, search, sort_presets,
};
pub use store::{ATTRIBUTION, Fetch, HttpFetch, PresetStore, StoreConfig};
