//! Engine configuration.
//!
//! Every field has a default, so an empty JSON/YAML document is a valid
//! configuration. Durations are plain millisecond counts on the wire.

use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How the resolver treats a selector that matches more than one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Pick the highest score and log a warning.
    #[default]
    BestEffort,
    /// Fail the resolution with `AmbiguousSelector`.
    Strict,
}

/// How `assert_not_exists` checks for absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotExistsMode {
    /// One check, right after the preceding action.
    #[default]
    Immediate,
    /// Poll until the element is gone or the assertion timeout elapses.
    UntilGone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub poll_interval_ms: u64,
    /// Zero disables the cache.
    pub cache_ttl_ms: u64,
    /// Entry count above which a full sweep of expired entries runs.
    pub cache_sweep_threshold: usize,
    pub ambiguity: AmbiguityPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            cache_ttl_ms: 5000,
            cache_sweep_threshold: 256,
            ambiguity: AmbiguityPolicy::BestEffort,
        }
    }
}

impl ResolverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub launch_max_wait_ms: u64,
    pub input_idle_timeout_ms: u64,
    pub tree_populate_wait_ms: u64,
    pub navigation_max_wait_ms: u64,
    pub readiness_poll_ms: u64,
    pub type_focus_delay_ms: u64,
    pub type_char_delay_ms: u64,
    pub artifact_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            launch_max_wait_ms: 15_000,
            input_idle_timeout_ms: 5_000,
            tree_populate_wait_ms: 3_000,
            navigation_max_wait_ms: 15_000,
            readiness_poll_ms: 250,
            type_focus_delay_ms: 100,
            type_char_delay_ms: 10,
            artifact_dir: PathBuf::from("artifacts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssertionConfig {
    pub not_exists: NotExistsMode,
    pub poll_interval_ms: u64,
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self {
            not_exists: NotExistsMode::Immediate,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub executor: ExecutorConfig,
    pub assertions: AssertionConfig,
    /// Used when a step carries no `timeoutMs`.
    pub default_step_timeout_ms: u64,
    /// How long to wait for the step's target window to show up.
    pub window_wait_ms: u64,
    /// Where learned domain hints are persisted. `None` picks the user data dir.
    pub hints_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            executor: ExecutorConfig::default(),
            assertions: AssertionConfig::default(),
            default_step_timeout_ms: 10_000,
            window_wait_ms: 5_000,
            hints_path: None,
        }
    }
}

impl EngineConfig {
    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(AutomationError::InvalidArgument(format!(
                    "unsupported config extension {other:?} for {}",
                    path.display()
                )))
            }
        };
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Apply `TERMINATOR_FLOW_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        fn read_u64(key: &str) -> Option<u64> {
            let raw = std::env::var(key).ok()?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring {key}={raw:?}: not a number");
                    None
                }
            }
        }

        if let Some(v) = read_u64("TERMINATOR_FLOW_CACHE_TTL_MS") {
            self.resolver.cache_ttl_ms = v;
        }
        if let Some(v) = read_u64("TERMINATOR_FLOW_POLL_INTERVAL_MS") {
            self.resolver.poll_interval_ms = v;
        }
        if let Some(v) = read_u64("TERMINATOR_FLOW_STEP_TIMEOUT_MS") {
            self.default_step_timeout_ms = v;
        }
        if let Ok(dir) = std::env::var("TERMINATOR_FLOW_ARTIFACT_DIR") {
            self.executor.artifact_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("TERMINATOR_FLOW_HINTS_PATH") {
            self.hints_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn resolved_hints_path(&self) -> Option<PathBuf> {
        self.hints_path.clone().or_else(|| {
            dirs::data_local_dir().map(|d| d.join("terminator-flow").join("domain_hints.json"))
        })
    }

    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    pub fn window_wait(&self) -> Duration {
        Duration::from_millis(self.window_wait_ms)
    }
}
