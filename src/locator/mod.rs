//! Self-healing element locator.
//!
//! Resolves a logical field name (e.g. `hours_field`) to a live element in
//! three tiers:
//!
//! 1. **Cache**: the selector that last worked for the field, re-validated
//!    with a short probe. A miss evicts the entry.
//! 2. **Catalog**: the field's static candidate strategies, front to back.
//!    The first hit is learned into the cache.
//! 3. **Heuristic**: tokens derived from the field name, searched by
//!    accessible label then placeholder. Heuristic hits are not learned.
//!
//! The catalog is never modified; only the cache changes at runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use diary_pilot::locator::{JsonSelectorStore, SelfHealingLocator};
//!
//! let store = JsonSelectorStore::in_dir("data");
//! let mut locator = SelfHealingLocator::new(page.clone(), Box::new(store));
//! let hours = locator.find("hours_field", Duration::from_secs(5)).await?;
//! page.fill(&hours, "8").await?;
//! ```

pub mod cache;
pub mod catalog;
pub mod strategy;

pub use cache::{JsonSelectorStore, MemorySelectorStore, SelectorStore, SELECTOR_CACHE_FILE};
pub use catalog::{field_names, lookup, FieldStrategy, FIELD_CATALOG};
pub use strategy::{Strategy, StrategyKind};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{ElementHandle, PageDriver};
use crate::config::PilotConfig;
use crate::error::{PilotError, Result};

/// Name fragments too generic to search for.
const GENERIC_TOKENS: &[&str] = &["field", "input", "button", "select", "btn"];

/// Probe timeouts for each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorConfig {
    /// Upper bound for re-validating a cached selector.
    pub cache_probe: Duration,
    /// Timeout for each catalog candidate.
    pub candidate_probe: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            cache_probe: Duration::from_secs(3),
            candidate_probe: Duration::from_secs(2),
        }
    }
}

impl LocatorConfig {
    #[must_use]
    pub fn from_config(config: &PilotConfig) -> Self {
        Self {
            cache_probe: Duration::from_millis(config.browser.cache_probe_ms),
            candidate_probe: Duration::from_millis(config.browser.candidate_probe_ms),
        }
    }
}

/// Tier that produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Cache,
    Catalog,
    Heuristic,
}

/// Locator over one page, with an injected learned-selector store.
pub struct SelfHealingLocator {
    driver: Arc<dyn PageDriver>,
    store: Box<dyn SelectorStore>,
    config: LocatorConfig,
    last_tier: Option<Tier>,
}

impl SelfHealingLocator {
    #[must_use]
    pub fn new(driver: Arc<dyn PageDriver>, store: Box<dyn SelectorStore>) -> Self {
        Self {
            driver,
            store,
            config: LocatorConfig::default(),
            last_tier: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: LocatorConfig) -> Self {
        self.config = config;
        self
    }

    /// The driver this locator resolves against.
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn PageDriver> {
        &self.driver
    }

    /// Tier that served the most recent successful `find`.
    #[must_use]
    pub fn last_tier(&self) -> Option<Tier> {
        self.last_tier
    }

    /// Learned `(field, selector)` pairs.
    #[must_use]
    pub fn learned(&self) -> Vec<(String, String)> {
        self.store.entries()
    }

    /// Drop the learned selector for `field` and persist the change.
    pub fn forget(&mut self, field: &str) -> Result<bool> {
        let existed = self.store.remove(field);
        if existed {
            self.store.persist()?;
        }
        Ok(existed)
    }

    /// Resolve `field` to a live element.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::LocatorExhausted`] when the cache, every catalog
    /// candidate and the heuristic search all fail.
    pub async fn find(&mut self, field: &str, timeout: Duration) -> Result<ElementHandle> {
        self.resolve(field, timeout.min(self.config.cache_probe), None)
            .await
    }

    /// Like [`find`](Self::find), but no lookup runs past `deadline`.
    ///
    /// Each lookup timeout is cut to the time remaining, and tiers that would
    /// start after the deadline are skipped.
    pub async fn find_before(&mut self, field: &str, deadline: Instant) -> Result<ElementHandle> {
        self.resolve(field, self.config.cache_probe, Some(deadline))
            .await
    }

    async fn resolve(
        &mut self,
        field: &str,
        cache_probe: Duration,
        deadline: Option<Instant>,
    ) -> Result<ElementHandle> {
        if let Some(probe) = budget(cache_probe, deadline) {
            if let Some(element) = self.from_cache(field, probe).await {
                self.last_tier = Some(Tier::Cache);
                return Ok(element);
            }
        }

        let entry = catalog::lookup(field);
        if let Some(entry) = entry {
            if let Some(element) = self.from_catalog(entry, deadline).await {
                self.last_tier = Some(Tier::Catalog);
                return Ok(element);
            }
        }

        if budget(Duration::MAX, deadline).is_some() {
            if let Some(element) = self.from_heuristic(field).await {
                self.last_tier = Some(Tier::Heuristic);
                return Ok(element);
            }
        }

        let attempted = entry.map_or(0, FieldStrategy::len);
        warn!(field, attempted, "All selectors exhausted");
        Err(PilotError::LocatorExhausted {
            field: field.to_string(),
            attempted,
        })
    }

    async fn probe(&self, strategy: &Strategy, timeout: Duration) -> Option<ElementHandle> {
        match self.driver.locate(strategy, timeout).await {
            Ok(found) => found,
            Err(e) => {
                debug!(selector = %strategy, "Probe failed: {}", e);
                None
            }
        }
    }

    async fn from_cache(&mut self, field: &str, probe: Duration) -> Option<ElementHandle> {
        let selector = self.store.get(field)?;
        let strategy = Strategy::parse(&selector);

        if let Some(element) = self.probe(&strategy, probe).await {
            debug!(field, %selector, "Cache hit");
            return Some(element);
        }

        info!(field, %selector, "Cached selector stale, evicting");
        self.store.remove(field);
        if let Err(e) = self.store.persist() {
            warn!(field, "Failed to persist selector eviction: {}", e);
        }
        None
    }

    async fn from_catalog(
        &mut self,
        entry: &FieldStrategy,
        deadline: Option<Instant>,
    ) -> Option<ElementHandle> {
        for strategy in entry.strategies() {
            let probe = budget(self.config.candidate_probe, deadline)?;
            if let Some(element) = self.probe(&strategy, probe).await {
                let selector = strategy.selector();
                info!(field = entry.field, %selector, "Learned selector");
                self.store.set(entry.field, &selector);
                if let Err(e) = self.store.persist() {
                    warn!(field = entry.field, "Failed to persist learned selector: {}", e);
                }
                return Some(element);
            }
        }
        None
    }

    async fn from_heuristic(&self, field: &str) -> Option<ElementHandle> {
        for token in heuristic_tokens(field) {
            for strategy in [Strategy::label(&token), Strategy::placeholder(&token)] {
                let candidates = match self.driver.locate_all(&strategy).await {
                    Ok(found) => found,
                    Err(e) => {
                        debug!(selector = %strategy, "Heuristic probe failed: {}", e);
                        continue;
                    }
                };
                for element in candidates {
                    if self.driver.is_visible(&element).await.unwrap_or(false) {
                        info!(field, selector = %strategy, "Heuristic match");
                        return Some(element);
                    }
                }
            }
        }
        None
    }
}

/// Lookup timeout capped by the time left before `deadline`, or `None` once
/// it has passed.
fn budget(timeout: Duration, deadline: Option<Instant>) -> Option<Duration> {
    let Some(deadline) = deadline else {
        return Some(timeout);
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    (!remaining.is_zero()).then(|| timeout.min(remaining))
}

/// Search tokens for a field name: words minus generic suffixes, or all
/// words if nothing specific remains.
#[must_use]
pub fn heuristic_tokens(field: &str) -> Vec<String> {
    let words: Vec<String> = field
        .split('_')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let specific: Vec<String> = words
        .iter()
        .filter(|w| !GENERIC_TOKENS.contains(&w.as_str()))
        .cloned()
        .collect();
    if specific.is_empty() {
        words
    } else {
        specific
    }
}
