//! Selector resolution: parse, search, score, disambiguate, retry, cache.

use crate::config::{AmbiguityPolicy, ResolverConfig};
use crate::element::{ElementSnapshot, UIElement, WindowHandle, WindowInfo};
use crate::platforms::AccessibilityDriver;
use crate::selector::Selector;
use crate::wait::{cancelled_error, poll_until};
use crate::AutomationError;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// A resolved element.
///
/// `element` is safe to keep; `handle` must not outlive the call that
/// resolved it.
#[derive(Debug, Clone)]
pub struct SelectorMatch {
    pub element: ElementSnapshot,
    pub handle: UIElement,
    /// Zero-indexed poll attempt that found the element.
    pub retry_count: u32,
    pub score: u32,
    /// How many elements scored above zero.
    pub candidates: usize,
    pub from_cache: bool,
}

impl SelectorMatch {
    pub fn is_ambiguous(&self) -> bool {
        self.candidates > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    window: WindowHandle,
    process_id: u32,
    selector: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: ElementSnapshot,
    score: u32,
    candidates: usize,
    exact: bool,
    inserted_at: Instant,
}

/// TTL cache of resolved matches, keyed by window identity and selector.
#[derive(Debug)]
struct MatchCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    sweep_threshold: usize,
}

impl MatchCache {
    fn new(ttl: Duration, sweep_threshold: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            sweep_threshold,
        }
    }

    fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    fn get(&self, key: &CacheKey, exact: bool) -> Option<CacheEntry> {
        if !self.enabled() {
            return None;
        }
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            entries.remove(key);
            return None;
        }
        // a prefix-resolved entry can't answer an exact-mode lookup
        if exact && !entry.exact {
            return None;
        }
        Some(entry.clone())
    }

    fn insert(&self, key: CacheKey, entry: CacheEntry) {
        if !self.enabled() {
            return;
        }
        let mut entries = self.entries.lock();
        entries.insert(key, entry);
        if entries.len() > self.sweep_threshold {
            let ttl = self.ttl;
            let before = entries.len();
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            debug!(
                "Swept selector cache: {} -> {} entries",
                before,
                entries.len()
            );
        }
    }

    fn remove(&self, key: &CacheKey) {
        self.entries.lock().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

struct Scored {
    snapshot: ElementSnapshot,
    handle: UIElement,
    score: u32,
    index: usize,
}

/// Orders candidates best-first: score, then visible, enabled, larger area,
/// then tree order for a stable result.
fn compare_candidates(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.snapshot.visible.cmp(&a.snapshot.visible))
        .then_with(|| b.snapshot.enabled.cmp(&a.snapshot.enabled))
        .then_with(|| {
            b.snapshot
                .bounds
                .area()
                .partial_cmp(&a.snapshot.bounds.area())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.index.cmp(&b.index))
}

pub struct SelectorResolver {
    driver: Arc<dyn AccessibilityDriver>,
    cache: MatchCache,
    config: ResolverConfig,
}

impl SelectorResolver {
    pub fn new(driver: Arc<dyn AccessibilityDriver>, config: ResolverConfig) -> Self {
        let cache = MatchCache::new(config.cache_ttl(), config.cache_sweep_threshold);
        Self {
            driver,
            cache,
            config,
        }
    }

    pub fn driver(&self) -> &Arc<dyn AccessibilityDriver> {
        &self.driver
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Resolve `selector` inside `window`, polling until found or `timeout`.
    ///
    /// `Ok(None)` is the normal not-found outcome. Cancellation surfaces as
    /// `AutomationError::Cancelled`.
    #[instrument(level = "debug", skip(self, window, cancel), fields(window = %window.handle))]
    pub async fn resolve(
        &self,
        window: &WindowInfo,
        selector: &str,
        timeout: Duration,
        exact: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<SelectorMatch>, AutomationError> {
        let parsed = Selector::parse(selector)?;
        let polled = poll_until(self.config.poll_interval(), timeout, cancel, |attempt| {
            self.resolve_attempt(window, selector, &parsed, exact)
                .map(|found| {
                    found.map(|mut m| {
                        m.retry_count = attempt;
                        m
                    })
                })
        })
        .await?;

        if polled.value.is_none() {
            debug!(
                "Selector '{}' not found after {} attempts ({:?})",
                selector, polled.attempts, polled.elapsed
            );
        }
        Ok(polled.value)
    }

    /// Single-shot resolution for callers that must not wait.
    pub fn resolve_once(
        &self,
        window: &WindowInfo,
        selector: &str,
        exact: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<SelectorMatch>, AutomationError> {
        if cancel.is_cancelled() {
            return Err(cancelled_error("resolve"));
        }
        let parsed = Selector::parse(selector)?;
        self.resolve_attempt(window, selector, &parsed, exact)
    }

    fn cache_key(window: &WindowInfo, selector: &str) -> CacheKey {
        CacheKey {
            window: window.handle,
            process_id: window.process_id,
            selector: selector.to_string(),
        }
    }

    fn resolve_attempt(
        &self,
        window: &WindowInfo,
        raw: &str,
        selector: &Selector,
        exact: bool,
    ) -> Result<Option<SelectorMatch>, AutomationError> {
        let key = Self::cache_key(window, raw);

        if let Some(entry) = self.cache.get(&key, exact) {
            match self.driver.reacquire(window, &entry.snapshot) {
                Ok(Some(handle)) => {
                    debug!("Selector cache hit for '{}'", raw);
                    if entry.candidates > 1 {
                        warn!(
                            "Selector '{}' is ambiguous: {} candidates (cached pick {})",
                            raw,
                            entry.candidates,
                            entry.snapshot.display_name()
                        );
                    }
                    return Ok(Some(SelectorMatch {
                        element: entry.snapshot,
                        handle,
                        retry_count: 0,
                        score: entry.score,
                        candidates: entry.candidates,
                        from_cache: true,
                    }));
                }
                Ok(None) => debug!("Cached element for '{}' is gone, searching again", raw),
                Err(e) => debug!("Re-acquiring cached '{}' failed: {}", raw, e),
            }
            self.cache.remove(&key);
        }

        let Some(found) = self.search(window, raw, selector, exact)? else {
            return Ok(None);
        };

        self.cache.insert(
            key,
            CacheEntry {
                snapshot: found.element.clone(),
                score: found.score,
                candidates: found.candidates,
                exact,
                inserted_at: Instant::now(),
            },
        );
        Ok(Some(found))
    }

    /// One full traversal plus scoring.
    fn search(
        &self,
        window: &WindowInfo,
        raw: &str,
        selector: &Selector,
        exact: bool,
    ) -> Result<Option<SelectorMatch>, AutomationError> {
        let elements = match self.driver.descendants(window, selector.role.as_deref()) {
            Ok(elements) => elements,
            // the window went away mid-traversal; treat as not found this attempt
            Err(e) if e.is_transient() => {
                debug!("Tree traversal for '{}' hit a detached element: {}", raw, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut scored: Vec<Scored> = elements
            .into_iter()
            .enumerate()
            .filter_map(|(index, handle)| {
                let snapshot = handle.snapshot().ok()?;
                let score = selector.score(&snapshot, exact);
                (score > 0).then_some(Scored {
                    snapshot,
                    handle,
                    score,
                    index,
                })
            })
            .collect();

        if scored.is_empty() {
            return Ok(None);
        }

        scored.sort_by(compare_candidates);
        let candidates = scored.len();

        if candidates > 1 {
            let labels: Vec<String> = scored
                .iter()
                .take(5)
                .map(|c| format!("{} (score {})", c.snapshot.display_name(), c.score))
                .collect();
            warn!(
                "Selector '{}' is ambiguous: {} candidates [{}]",
                raw,
                candidates,
                labels.join(", ")
            );
            if self.config.ambiguity == AmbiguityPolicy::Strict {
                return Err(AutomationError::AmbiguousSelector {
                    selector: raw.to_string(),
                    candidates,
                });
            }
        }

        let best = scored.swap_remove(0);
        Ok(Some(SelectorMatch {
            element: best.snapshot,
            handle: best.handle,
            retry_count: 0,
            score: best.score,
            candidates,
            from_cache: false,
        }))
    }
}
