//! On-disk preset database cache with TTL refresh.
//!
//! The database is a JSONL file mirrored from the OPRA project. A copy younger than the TTL
//! is used as is; otherwise it is downloaded again, and a failed download falls back to the
//! stale copy. Without any copy the store yields no presets rather than an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::convert::ShelfHandling;
use crate::model::OpraPreset;
use crate::parse::parse_file;

pub const OPRA_DATABASE_URL: &str =
    "https://raw.githubusercontent.com/opra-project/OPRA/main/dist/database_v1.jsonl";
pub const OPRA_REPO_URL: &str = "https://github.com/opra-project/OPRA";
pub const CACHE_FILE: &str = "opra_presets.jsonl";
pub const DEFAULT_TTL_DAYS: u64 = 7;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const MAX_DATABASE_BYTES: u64 = 256 * 1024 * 1024;
const USER_AGENT: &str = concat!("pcm-bridge/", env!("CARGO_PKG_VERSION"));

pub const ATTRIBUTION: &str = "EQ Presets: OPRA (Open Parametric Room Acoustics)
Licensed under CC BY-SA 4.0
Data sources: AutoEQ, oratory1990, and community contributors
https://github.com/opra-project/OPRA

EQ Implementation: Concepts from pulseaudio-equalizer-ladspa
Licensed under GPL-3.0
https://github.com/pulseaudio-equalizer-ladspa/equalizer";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database URL.
    pub url: String,
    /// Directory holding the cached database.
    pub cache_dir: PathBuf,
    /// Age after which the cached copy is refreshed.
    pub ttl_days: u64,
    /// Download timeout, whole request.
    pub fetch_timeout_secs: u64,
    /// How shelf filters are converted.
    pub shelf_handling: ShelfHandling,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: OPRA_DATABASE_URL.to_string(),
            cache_dir: std::env::temp_dir().join("pcm-bridge"),
            ttl_days: DEFAULT_TTL_DAYS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            shelf_handling: ShelfHandling::default(),
        }
    }
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days.saturating_mul(24 * 60 * 60))
    }
}

/// Downloads the raw database.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetch {
    agent: ureq::Agent,
}

impl HttpFetch {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .user_agent(USER_AGENT)
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Fetch for HttpFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("preset database request failed url={url}"))?;
        resp.into_body()
            .with_config()
            .limit(MAX_DATABASE_BYTES)
            .read_to_vec()
            .context("preset database read failed")
    }
}

/// Shared preset cache.
///
/// Loads may race from several threads; one loader parses at a time and the others reuse
/// its result. Cache file writes are serialized and land through a rename.
pub struct PresetStore {
    config: StoreConfig,
    fetcher: Arc<dyn Fetch>,
    file_lock: Mutex<()>,
    reload_lock: Mutex<()>,
    presets: RwLock<Option<Arc<Vec<OpraPreset>>>>,
}

impl PresetStore {
    pub fn new(config: StoreConfig) -> Self {
        let fetcher = Arc::new(HttpFetch::new(Duration::from_secs(config.fetch_timeout_secs)));
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: StoreConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            config,
            fetcher,
            file_lock: Mutex::new(()),
            reload_lock: Mutex::new(()),
            presets: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn shelf_handling(&self) -> ShelfHandling {
        self.config.shelf_handling
    }

    pub fn cache_path(&self) -> PathBuf {
        self.config.cache_dir.join(CACHE_FILE)
    }

    pub fn is_cache_valid(&self) -> bool {
        cache_is_fresh(&self.cache_path(), self.config.ttl())
    }

    /// Make sure a database file exists, downloading when the cached copy is stale.
    /// Returns the file to read, or `None` when nothing is available.
    pub fn fetch_database(&self) -> Option<PathBuf> {
        let path = self.cache_path();
        if let Err(err) = fs::create_dir_all(&self.config.cache_dir) {
            tracing::warn!(dir = ?self.config.cache_dir, error = %err, "unable to create cache directory");
        }

        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_cache_valid() {
            tracing::info!(path = ?path, "using cached presets");
            return Some(path);
        }

        tracing::info!(url = %self.config.url, "downloading presets");
        match self.download(&path) {
            Ok(bytes) => {
                tracing::info!(path = ?path, bytes, "cached presets");
                Some(path)
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to download presets");
                if path.exists() {
                    tracing::info!(path = ?path, "falling back to cached presets");
                    Some(path)
                } else {
                    tracing::error!("no cached presets available");
                    None
                }
            }
        }
    }

    fn download(&self, path: &Path) -> Result<usize> {
        let payload = self.fetcher.fetch(&self.config.url)?;
        let tmp = path.with_extension("jsonl.part");
        fs::write(&tmp, &payload).with_context(|| format!("write {:?}", tmp))?;
        fs::rename(&tmp, path).with_context(|| format!("rename {:?} -> {:?}", tmp, path))?;
        Ok(payload.len())
    }

    /// Presets, from memory when already loaded unless `force_reload`.
    pub fn load(&self, force_reload: bool) -> Arc<Vec<OpraPreset>> {
        if !force_reload {
            if let Some(presets) = self.loaded() {
                return presets;
            }
        }

        let _reload = self.reload_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !force_reload {
            if let Some(presets) = self.loaded() {
                return presets;
            }
        }

        let Some(path) = self.fetch_database() else {
            return Arc::new(Vec::new());
        };
        let presets = match self.parse_locked(&path) {
            Ok(presets) => Arc::new(presets),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read preset cache");
                return Arc::new(Vec::new());
            }
        };
        tracing::info!(count = presets.len(), "loaded presets");
        *self.presets.write().unwrap_or_else(|e| e.into_inner()) = Some(presets.clone());
        presets
    }

    /// Presets already in memory, else whatever the cache file holds, without fetching.
    pub fn load_cached(&self) -> Arc<Vec<OpraPreset>> {
        if let Some(presets) = self.loaded() {
            return presets;
        }
        let path = self.cache_path();
        if !path.exists() {
            return Arc::new(Vec::new());
        }
        Arc::new(self.parse_or_empty(&path))
    }

    /// Presets from a fresh cache file only. `None` when the file is missing or stale.
    pub fn load_cache_only(&self) -> Option<Vec<OpraPreset>> {
        if !self.is_cache_valid() {
            return None;
        }
        Some(self.parse_or_empty(&self.cache_path()))
    }

    fn loaded(&self) -> Option<Arc<Vec<OpraPreset>>> {
        self.presets.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn parse_locked(&self, path: &Path) -> Result<Vec<OpraPreset>> {
        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        parse_file(path)
    }

    fn parse_or_empty(&self, path: &Path) -> Vec<OpraPreset> {
        self.parse_locked(path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to read preset cache");
            Vec::new()
        })
    }
}

fn cache_is_fresh(path: &Path, ttl: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    age < ttl
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DB: &str = concat!(
        r#"{"name":"One","filters":[{"frequency":100,"gain":1,"Q":1}]}"#,
        "\n",
        r#"{"name":"Two","filters":[]}"#,
        "\n"
    );

    struct FakeFetch {
        body: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FakeFetch {
        fn new(body: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                body,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Fetch for FakeFetch {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body
                .map(|b| b.as_bytes().to_vec())
                .ok_or_else(|| anyhow!("offline"))
        }
    }

    fn store(dir: &Path, ttl_days: u64, fetch: Arc<FakeFetch>) -> PresetStore {
        let config = StoreConfig {
            cache_dir: dir.to_path_buf(),
            ttl_days,
            ..StoreConfig::default()
        };
        PresetStore::with_fetcher(config, fetch)
    }

    #[test]
    fn download_populates_cache_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new(Some(DB));
        let store = store(dir.path(), 7, fetch.clone());

        let presets = store.load(false);
        assert_eq!(presets.len(), 2);
        assert!(store.cache_path().exists());
        assert!(store.is_cache_valid());

        store.load(false);
        store.load(true);
        assert_eq!(fetch.calls(), 1, "fresh cache file is reused");
    }

    #[test]
    fn stale_cache_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CACHE_FILE), r#"{"name":"Old"}"#).unwrap();
        let fetch = FakeFetch::new(Some(DB));
        let store = store(dir.path(), 0, fetch.clone());

        assert_eq!(store.load(false).len(), 2);
        assert_eq!(fetch.calls(), 1);
    }

    #[test]
    fn failed_download_falls_back_to_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CACHE_FILE), r#"{"name":"Old"}"#).unwrap();
        let store = store(dir.path(), 0, FakeFetch::new(None));

        let presets = store.load(false);
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].name, "Old");
        assert!(store.load_cache_only().is_none());
    }

    #[test]
    fn nothing_available_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 7, FakeFetch::new(None));
        assert!(store.fetch_database().is_none());
        assert!(store.load(false).is_empty());
        assert!(store.load_cached().is_empty());
        assert!(store.load_cache_only().is_none());
    }

    #[test]
    fn cache_only_reads_fresh_file_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CACHE_FILE), DB).unwrap();
        let fetch = FakeFetch::new(Some(DB));
        let store = store(dir.path(), 7, fetch.clone());

        assert_eq!(store.load_cache_only().map(|p| p.len()), Some(2));
        assert_eq!(store.load_cached().len(), 2);
        assert_eq!(fetch.calls(), 0);
    }

    #[test]
    fn concurrent_loads_share_one_parse() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FakeFetch::new(Some(DB));
        let store = Arc::new(store(dir.path(), 0, fetch.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.load(false).len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
        assert_eq!(fetch.calls(), 1);
    }

    #[test]
    fn config_defaults() {
        let config: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.url, OPRA_DATABASE_URL);
        assert_eq!(config.ttl(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.shelf_handling, ShelfHandling::Approximate);
    }
}
