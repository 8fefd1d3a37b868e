//! Learned-selector storage.
//!
//! The locator remembers, per field, the last selector that resolved. The
//! store is injected so tests can use [`MemorySelectorStore`] while real runs
//! use [`JsonSelectorStore`], a flat JSON object on disk shared across runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;
use crate::persist;

/// Default cache file name inside the data directory.
pub const SELECTOR_CACHE_FILE: &str = "selector_cache.json";

/// Minimal read/write contract for learned selectors.
pub trait SelectorStore: Send + Sync {
    /// Selector last learned for `field`.
    fn get(&self, field: &str) -> Option<String>;

    /// Record `selector` for `field`, overwriting any prior value.
    fn set(&mut self, field: &str, selector: &str);

    /// Forget `field`. Returns whether an entry existed.
    fn remove(&mut self, field: &str) -> bool;

    /// Flush to durable storage.
    fn persist(&self) -> Result<()>;

    /// All learned entries, sorted by field.
    fn entries(&self) -> Vec<(String, String)>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// Store that never touches disk.
#[derive(Debug, Default, Clone)]
pub struct MemorySelectorStore {
    entries: BTreeMap<String, String>,
}

impl MemorySelectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry, e.g. to simulate a selector learned in an earlier run.
    #[must_use]
    pub fn with_entry(mut self, field: &str, selector: &str) -> Self {
        self.entries.insert(field.to_string(), selector.to_string());
        self
    }
}

impl SelectorStore for MemorySelectorStore {
    fn get(&self, field: &str) -> Option<String> {
        self.entries.get(field).cloned()
    }

    fn set(&mut self, field: &str, selector: &str) {
        self.entries.insert(field.to_string(), selector.to_string());
    }

    fn remove(&mut self, field: &str) -> bool {
        self.entries.remove(field).is_some()
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// Store backed by a single JSON object `{ field: selector }` on disk.
///
/// The file is read once at construction and rewritten atomically (temp file
/// plus rename, under an advisory lock) on every `persist`.
#[derive(Debug, Clone)]
pub struct JsonSelectorStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonSelectorStore {
    /// Open the store at `path`, loading existing entries.
    ///
    /// A missing or corrupted file yields an empty store; corruption is
    /// logged rather than surfaced so a bad cache never blocks a run.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match persist::read_json::<BTreeMap<String, String>>(&path) {
            Ok(Some(entries)) => {
                info!("Loaded {} cached selectors", entries.len());
                entries
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(
                    "Corrupted selector cache at {}: {}. Starting empty.",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    /// Open `selector_cache.json` inside `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Self {
        Self::open(data_dir.as_ref().join(SELECTOR_CACHE_FILE))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SelectorStore for JsonSelectorStore {
    fn get(&self, field: &str) -> Option<String> {
        self.entries.get(field).cloned()
    }

    fn set(&mut self, field: &str, selector: &str) {
        self.entries.insert(field.to_string(), selector.to_string());
    }

    fn remove(&mut self, field: &str) -> bool {
        self.entries.remove(field).is_some()
    }

    fn persist(&self) -> Result<()> {
        persist::write_json_atomic(&self.path, &self.entries)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
