//! Learned host -> window-title hints used to shorten navigation waits.
//!
//! The in-memory map is the source of truth. Disk writes snapshot the map
//! under the lock and run on a background task; failures are logged at debug
//! level and otherwise dropped. Every snapshot carries a version and writes
//! are serialized, so an older snapshot never lands after a newer one.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use url::{Host, Url};

const MIN_HINT_CHARS: usize = 2;

const TITLE_SEPARATORS: &[&str] = &[" - ", " | ", " — ", " – ", " · ", " • ", " :: "];

/// Friendly names for sites whose window titles don't contain the hostname.
const WELL_KNOWN_SITES: &[(&str, &str)] = &[
    ("mail.google.com", "Gmail"),
    ("docs.google.com", "Google Docs"),
    ("drive.google.com", "Google Drive"),
    ("google.com", "Google"),
    ("youtube.com", "YouTube"),
    ("github.com", "GitHub"),
    ("stackoverflow.com", "Stack Overflow"),
    ("wikipedia.org", "Wikipedia"),
    ("outlook.live.com", "Outlook"),
    ("outlook.office.com", "Outlook"),
    ("linkedin.com", "LinkedIn"),
    ("facebook.com", "Facebook"),
    ("reddit.com", "Reddit"),
    ("amazon.com", "Amazon"),
    ("bing.com", "Bing"),
    ("learn.microsoft.com", "Microsoft Learn"),
    ("chatgpt.com", "ChatGPT"),
];

static BROWSER_SUFFIX_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // "Page and 3 more pages - Profile 1 - Microsoft Edge"
        r"(?i)\s+and \d+ more pages?\b.*$",
        r"(?i)\s+[-—–]\s+(personal|work|profile \d+)\s+[-—–]\s+microsoft\s*edge$",
        r"(?i)\s+[-—–]\s+(google chrome|chromium|microsoft\s*edge|mozilla firefox|firefox|brave|opera|vivaldi|arc)$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Strip a leading `www.` and lowercase.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// Reduce a raw browser window title to a reusable hint.
///
/// `"Example Domain - Google Chrome"` becomes `"Example Domain"`. Returns
/// `None` when what's left is shorter than two characters.
pub fn extract_title_hint(title: &str) -> Option<String> {
    let mut cleaned = title.trim().to_string();
    for pattern in BROWSER_SUFFIX_PATTERNS.iter() {
        cleaned = pattern.replace(&cleaned, "").into_owned();
    }

    let first = TITLE_SEPARATORS
        .iter()
        .filter_map(|sep| cleaned.find(sep))
        .min()
        .map(|idx| &cleaned[..idx])
        .unwrap_or(&cleaned)
        .trim();

    (first.chars().count() >= MIN_HINT_CHARS).then(|| first.to_string())
}

fn is_local_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(d)) => {
            let d = d.to_lowercase();
            d == "localhost" || d.ends_with(".localhost") || d.ends_with(".local")
        }
        Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn is_ip_literal(url: &Url) -> bool {
    matches!(url.host(), Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)))
}

/// Where a derived hint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintSource {
    Learned,
    LocalPath,
    LocalPort,
    WellKnown,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainHint {
    pub host: String,
    pub hint: String,
    pub source: HintSource,
}

#[derive(Default)]
struct HintState {
    hints: HashMap<String, String>,
    /// Bumped on every change; the snapshot handed to the writer carries it.
    version: u64,
}

pub struct DomainHintStore {
    state: Arc<Mutex<HintState>>,
    path: Option<PathBuf>,
    /// Version of the last snapshot written to disk. Holding the lock is what
    /// serializes writers.
    written: Arc<tokio::sync::Mutex<u64>>,
}

impl DomainHintStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(HintState::default())),
            path: None,
            written: Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    /// Load previously learned hints from `path`. A missing or unreadable
    /// file starts an empty store that will still persist to `path`.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hints: HashMap<String, String> = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                debug!("Ignoring unreadable hint file {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) => {
                debug!("No hint file at {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        info!("Loaded {} domain hints from {}", hints.len(), path.display());
        Self {
            state: Arc::new(Mutex::new(HintState { hints, version: 0 })),
            path: Some(path),
            written: Arc::new(tokio::sync::Mutex::new(0)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, host: &str) -> Option<String> {
        self.state.lock().hints.get(&normalize_host(host)).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().hints.is_empty()
    }

    /// Record what a navigation to `host` actually looked like.
    ///
    /// Returns the stored hint when the map changed. Same-value learns and
    /// titles that don't yield a usable hint are no-ops.
    pub fn learn(&self, host: &str, observed_title: &str) -> Option<String> {
        let host = normalize_host(host);
        if host.is_empty() {
            return None;
        }
        let hint = extract_title_hint(observed_title)?;

        let snapshot = {
            let mut state = self.state.lock();
            if state.hints.get(&host) == Some(&hint) {
                return None;
            }
            state.hints.insert(host.clone(), hint.clone());
            state.version += 1;
            self.path
                .as_ref()
                .map(|_| (state.version, state.hints.clone()))
        };
        debug!("Learned domain hint '{}' -> '{}'", host, hint);

        if let (Some(path), Some((version, hints))) = (self.path.clone(), snapshot) {
            persist_in_background(path, self.written.clone(), version, hints);
        }
        Some(hint)
    }

    /// Write the current map to disk unless the latest version is already
    /// there. Waits for any in-flight background write first.
    pub async fn flush(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let (version, hints) = {
            let state = self.state.lock();
            (state.version, state.hints.clone())
        };
        write_if_newer(path, &self.written, version, &hints).await;
    }

    /// Derive the title fragment to wait for after navigating to `url`.
    ///
    /// Priority: learned hint, local path segment or port, well-known site
    /// name, then the first hostname label.
    pub fn derive(&self, url: &str) -> Option<DomainHint> {
        // "localhost:3000" parses as a scheme, so retry with one when no host came out
        let parsed = Url::parse(url)
            .ok()
            .filter(|u| u.host_str().is_some())
            .or_else(|| Url::parse(&format!("https://{url}")).ok())?;
        let host = normalize_host(parsed.host_str()?);

        if let Some(hint) = self.get(&host) {
            return Some(DomainHint {
                host,
                hint,
                source: HintSource::Learned,
            });
        }

        // a bare IP says nothing a page title would repeat
        if is_local_host(&parsed) || is_ip_literal(&parsed) {
            if let Some(segment) = parsed
                .path_segments()
                .and_then(|mut s| s.find(|seg| !seg.is_empty()))
            {
                return Some(DomainHint {
                    host,
                    hint: segment.to_string(),
                    source: HintSource::LocalPath,
                });
            }
            if let Some(port) = parsed.port() {
                return Some(DomainHint {
                    host,
                    hint: port.to_string(),
                    source: HintSource::LocalPort,
                });
            }
            if is_ip_literal(&parsed) {
                return Some(DomainHint {
                    hint: host.clone(),
                    host,
                    source: HintSource::Generic,
                });
            }
        }

        if let Some((_, name)) = WELL_KNOWN_SITES
            .iter()
            .find(|(site, _)| host == *site || host.ends_with(&format!(".{site}")))
        {
            return Some(DomainHint {
                host,
                hint: name.to_string(),
                source: HintSource::WellKnown,
            });
        }

        let label = host.split('.').next().unwrap_or(&host).to_string();
        Some(DomainHint {
            host,
            hint: label,
            source: HintSource::Generic,
        })
    }
}

fn persist_in_background(
    path: PathBuf,
    written: Arc<tokio::sync::Mutex<u64>>,
    version: u64,
    snapshot: HashMap<String, String>,
) {
    let write = async move {
        write_if_newer(&path, &written, version, &snapshot).await;
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(write);
        }
        Err(_) => debug!("No tokio runtime; skipping domain hint persistence"),
    }
}

async fn write_if_newer(
    path: &Path,
    written: &tokio::sync::Mutex<u64>,
    version: u64,
    hints: &HashMap<String, String>,
) {
    let mut last = written.lock().await;
    if version <= *last {
        debug!("Skipping stale domain hint snapshot v{} (disk has v{})", version, *last);
        return;
    }
    match write_hints(path, hints).await {
        Ok(()) => *last = version,
        Err(e) => debug!("Dropping domain hint write to {}: {}", path.display(), e),
    }
}

async fn write_hints(path: &Path, hints: &HashMap<String, String>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let json = serde_json::to_string_pretty(hints).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host_strips_www() {
        assert_eq!(normalize_host("WWW.Example.com"), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
    }

    #[test]
    fn test_extract_title_hint_strips_browser_suffix() {
        assert_eq!(
            extract_title_hint("Example Domain - Google Chrome").as_deref(),
            Some("Example Domain")
        );
        assert_eq!(
            extract_title_hint("Inbox (3) - someone@example.com - Gmail - Mozilla Firefox")
                .as_deref(),
            Some("Inbox (3)")
        );
        assert_eq!(
            extract_title_hint("Pull requests and 2 more pages - Personal - Microsoft Edge")
                .as_deref(),
            Some("Pull requests")
        );
    }

    #[test]
    fn test_extract_title_hint_skips_short() {
        assert_eq!(extract_title_hint("X - Google Chrome"), None);
        assert_eq!(extract_title_hint("   "), None);
    }

    #[test]
    fn test_derive_generic_fallback() {
        let store = DomainHintStore::in_memory();
        let hint = store.derive("https://example.com").unwrap();
        assert_eq!(hint.host, "example.com");
        assert_eq!(hint.hint, "example");
        assert_eq!(hint.source, HintSource::Generic);

        let hint = store.derive("https://www.rust-lang.org/learn").unwrap();
        assert_eq!(hint.host, "rust-lang.org");
        assert_eq!(hint.hint, "rust-lang");
    }

    #[test]
    fn test_derive_local_hosts() {
        let store = DomainHintStore::in_memory();
        let hint = store.derive("http://localhost:3000/dashboard/users").unwrap();
        assert_eq!(hint.hint, "dashboard");
        assert_eq!(hint.source, HintSource::LocalPath);

        let hint = store.derive("http://127.0.0.1:8080/").unwrap();
        assert_eq!(hint.hint, "8080");
        assert_eq!(hint.source, HintSource::LocalPort);
    }

    #[test]
    fn test_derive_ip_literal_uses_path_or_port() {
        let store = DomainHintStore::in_memory();
        let hint = store.derive("http://192.168.1.5/app").unwrap();
        assert_eq!(hint.hint, "app");
        assert_eq!(hint.source, HintSource::LocalPath);

        let hint = store.derive("http://10.0.0.7:9000").unwrap();
        assert_eq!(hint.hint, "9000");
        assert_eq!(hint.source, HintSource::LocalPort);

        let hint = store.derive("http://10.0.0.7/").unwrap();
        assert_eq!(hint.hint, "10.0.0.7");
    }

    #[test]
    fn test_derive_well_known() {
        let store = DomainHintStore::in_memory();
        let hint = store.derive("https://en.wikipedia.org/wiki/Rust").unwrap();
        assert_eq!(hint.hint, "Wikipedia");
        assert_eq!(hint.source, HintSource::WellKnown);
        assert_eq!(store.derive("github.com/mediar-ai").unwrap().hint, "GitHub");
    }

    #[test]
    fn test_learned_hint_takes_priority() {
        let store = DomainHintStore::in_memory();
        assert_eq!(
            store.learn("www.github.com", "mediar-ai/terminator - Google Chrome"),
            Some("mediar-ai/terminator".to_string())
        );
        let hint = store.derive("https://github.com/mediar-ai").unwrap();
        assert_eq!(hint.source, HintSource::Learned);
        assert_eq!(hint.hint, "mediar-ai/terminator");
    }

    #[test]
    fn test_learn_only_overwrites_on_change() {
        let store = DomainHintStore::in_memory();
        assert!(store.learn("example.com", "Example Domain").is_some());
        assert!(store.learn("example.com", "Example Domain - Google Chrome").is_none());
        assert_eq!(
            store.learn("example.com", "Example Portal"),
            Some("Example Portal".to_string())
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hints.json");

        let store = DomainHintStore::load(&path);
        assert!(store.is_empty());
        store.learn("example.com", "Example Domain - Microsoft Edge");
        store.flush().await;

        let reloaded = DomainHintStore::load(&path);
        assert_eq!(reloaded.get("www.example.com").as_deref(), Some("Example Domain"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rapid_learns_all_reach_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hints.json");
        let store = DomainHintStore::load(&path);

        for i in 0..30 {
            store.learn(&format!("host{i}.com"), &format!("Title number {i}"));
        }
        store.flush().await;

        let reloaded = DomainHintStore::load(&path);
        assert_eq!(reloaded.len(), 30);
        assert_eq!(reloaded.get("host29.com").as_deref(), Some("Title number 29"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_background_writes_never_regress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hints.json");
        let store = DomainHintStore::load(&path);

        for i in 0..30 {
            store.learn(&format!("host{i}.com"), &format!("Title number {i}"));
        }

        // no flush: the newest background snapshot must win on its own
        let mut on_disk = 0;
        for _ in 0..100 {
            on_disk = DomainHintStore::load(&path).len();
            if on_disk == 30 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(on_disk, 30);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(DomainHintStore::load(&path).len(), 30);
    }

    #[test]
    fn test_learn_without_runtime_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = DomainHintStore::load(dir.path().join("hints.json"));
        assert!(store.learn("example.com", "Example Domain").is_some());
        assert_eq!(store.get("example.com").as_deref(), Some("Example Domain"));
    }
}
