//! Runs the physical effect of one step.

use crate::config::ExecutorConfig;
use crate::domain_hints::{DomainHintStore, HintSource};
use crate::element::{strip_exe, ScrollDirection, UIElement, WindowInfo};
use crate::flow::Action;
use crate::platforms::AccessibilityDriver;
use crate::report::ActionResult;
use crate::wait::{poll_until, sleep_cancellable};
use crate::AutomationError;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One wheel notch.
const WHEEL_DELTA: i32 = 120;

/// Browser process names mapped to their usual install locations, relative
/// to the listed environment variable.
const BROWSER_INSTALL_LOCATIONS: &[(&str, &str, &str)] = &[
    ("chrome", "ProgramFiles", r"Google\Chrome\Application\chrome.exe"),
    ("chrome", "ProgramFiles(x86)", r"Google\Chrome\Application\chrome.exe"),
    ("chrome", "LOCALAPPDATA", r"Google\Chrome\Application\chrome.exe"),
    ("msedge", "ProgramFiles(x86)", r"Microsoft\Edge\Application\msedge.exe"),
    ("msedge", "ProgramFiles", r"Microsoft\Edge\Application\msedge.exe"),
    ("firefox", "ProgramFiles", r"Mozilla Firefox\firefox.exe"),
    ("firefox", "ProgramFiles(x86)", r"Mozilla Firefox\firefox.exe"),
    ("brave", "ProgramFiles", r"BraveSoftware\Brave-Browser\Application\brave.exe"),
    ("brave", "LOCALAPPDATA", r"BraveSoftware\Brave-Browser\Application\brave.exe"),
];

/// Everything the orchestrator resolved for a step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepTarget<'a> {
    pub element: Option<&'a UIElement>,
    pub window: Option<&'a WindowInfo>,
    /// The step's own `timeoutMs`, if it had one.
    pub timeout: Option<Duration>,
}

pub struct ActionExecutor {
    driver: Arc<dyn AccessibilityDriver>,
    hints: Arc<DomainHintStore>,
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(
        driver: Arc<dyn AccessibilityDriver>,
        hints: Arc<DomainHintStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            driver,
            hints,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.readiness_poll_ms.max(1))
    }

    /// Execute `action`.
    ///
    /// An element that vanishes mid-action yields a failed result. Cancellation
    /// and genuine platform failures come back as `Err`.
    #[instrument(level = "debug", skip(self, action, target, cancel), fields(action = %action.kind()))]
    pub async fn execute(
        &self,
        action: &Action,
        target: StepTarget<'_>,
        cancel: &CancellationToken,
    ) -> Result<ActionResult, AutomationError> {
        let outcome = match action {
            Action::Click { selector } => self.click(selector, target.element),
            Action::Type { text, .. } => self.type_text(text, target.element, cancel).await,
            Action::SendKeys { keys } => self.send_keys(keys),
            Action::Wait { duration } => self.wait(*duration, cancel).await,
            Action::Navigate { url, browser } => {
                self.navigate(url, browser.as_deref(), target.timeout, cancel)
                    .await
            }
            Action::Screenshot { path } => self.screenshot(path.as_deref(), target.window).await,
            Action::Scroll {
                direction, amount, ..
            } => self.scroll(*direction, *amount, target.element),
            Action::FocusWindow { title } => self.focus_window(title.as_deref(), target.window),
            Action::Launch {
                path,
                args,
                window_title,
            } => {
                self.launch(path, args, window_title.as_deref(), cancel)
                    .await
            }
            Action::Hover { selector } => self.hover(selector, target.element),
            Action::AssertExists { .. }
            | Action::AssertNotExists { .. }
            | Action::AssertText { .. }
            | Action::AssertWindow { .. } => Err(AutomationError::InvalidArgument(format!(
                "'{}' is an assertion and is evaluated, not executed",
                action.kind()
            ))),
        };

        match outcome {
            Err(e) if e.is_transient() => {
                warn!("Element became unavailable during '{}': {}", action.kind(), e);
                Ok(ActionResult::failed(e.to_string()))
            }
            Err(e) if e.is_caller_error() => Ok(ActionResult::failed(e.to_string())),
            other => other,
        }
    }

    fn require_element<'a>(
        element: Option<&'a UIElement>,
        what: &str,
    ) -> Result<&'a UIElement, AutomationError> {
        element.ok_or_else(|| {
            AutomationError::InvalidArgument(format!("{what} requires a resolved element"))
        })
    }

    fn click(
        &self,
        selector: &str,
        element: Option<&UIElement>,
    ) -> Result<ActionResult, AutomationError> {
        let element = Self::require_element(element, "click")?;
        element.click()?;
        debug!("Clicked '{}'", selector);
        Ok(ActionResult::ok())
    }

    fn hover(
        &self,
        selector: &str,
        element: Option<&UIElement>,
    ) -> Result<ActionResult, AutomationError> {
        let element = Self::require_element(element, "hover")?;
        element.hover()?;
        debug!("Hovered '{}'", selector);
        Ok(ActionResult::ok())
    }

    /// Appends `text` at the caret, one character at a time.
    async fn type_text(
        &self,
        text: &str,
        element: Option<&UIElement>,
        cancel: &CancellationToken,
    ) -> Result<ActionResult, AutomationError> {
        if let Some(element) = element {
            element.click()?;
            sleep_cancellable(Duration::from_millis(self.config.type_focus_delay_ms), cancel)
                .await?;
        }

        let char_delay = Duration::from_millis(self.config.type_char_delay_ms);
        for ch in text.chars() {
            if cancel.is_cancelled() {
                return Err(crate::wait::cancelled_error("type"));
            }
            self.driver.send_char(ch)?;
            if !char_delay.is_zero() {
                sleep_cancellable(char_delay, cancel).await?;
            }
        }
        debug!("Typed {} characters", text.chars().count());
        Ok(ActionResult::ok())
    }

    fn send_keys(&self, keys: &str) -> Result<ActionResult, AutomationError> {
        self.driver.send_keys(keys)?;
        Ok(ActionResult::ok())
    }

    async fn wait(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<ActionResult, AutomationError> {
        sleep_cancellable(duration, cancel).await?;
        Ok(ActionResult::ok())
    }

    fn scroll(
        &self,
        direction: ScrollDirection,
        amount: f64,
        element: Option<&UIElement>,
    ) -> Result<ActionResult, AutomationError> {
        if let Some(element) = element {
            match element.scroll(direction, amount) {
                Ok(()) => return Ok(ActionResult::ok()),
                Err(AutomationError::UnsupportedOperation(reason)) => {
                    debug!("Structured scroll unavailable ({}), using the wheel", reason);
                }
                Err(e) => return Err(e),
            }
        }

        let notches = amount.round().max(1.0) as i32;
        let delta = direction.wheel_sign() * WHEEL_DELTA * notches;
        self.driver.mouse_wheel(delta, direction.is_horizontal())?;
        Ok(ActionResult::ok().with_diagnostic(format!("wheel delta {delta}")))
    }

    fn focus_window(
        &self,
        title: Option<&str>,
        window: Option<&WindowInfo>,
    ) -> Result<ActionResult, AutomationError> {
        let found = match title {
            Some(title) => self.driver.find_window(None, Some(title))?,
            None => window.cloned(),
        };
        let Some(found) = found else {
            return Ok(ActionResult::failed(format!(
                "no window matching '{}'",
                title.unwrap_or("<target>")
            )));
        };
        self.driver.focus_window(&found)?;
        info!("Focused window '{}'", found.title);
        Ok(ActionResult::ok().with_window(found))
    }

    async fn screenshot(
        &self,
        path: Option<&str>,
        window: Option<&WindowInfo>,
    ) -> Result<ActionResult, AutomationError> {
        let shot = self.driver.capture(window).await?;

        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(&shot.image_data, shot.width, shot.height, ExtendedColorType::Rgba8)
            .map_err(|e| AutomationError::PlatformError(format!("Failed to encode PNG: {e}")))?;

        let path = match path {
            Some(p) => PathBuf::from(p),
            None => self.config.artifact_dir.join(format!(
                "screenshot_{}.png",
                chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f")
            )),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, png).await?;
        info!("Saved {}x{} screenshot to {}", shot.width, shot.height, path.display());
        Ok(ActionResult::ok().with_artifact(path))
    }

    /// Opens `url` and waits for a window whose title carries the domain hint.
    async fn navigate(
        &self,
        url: &str,
        browser: Option<&str>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ActionResult, AutomationError> {
        let mut result = ActionResult::ok();

        let browser_path = match browser {
            Some(name) => {
                let found = resolve_browser(name);
                if found.is_none() {
                    warn!("Browser '{}' not found, using the default handler", name);
                    result = result.with_diagnostic(format!(
                        "browser '{name}' not found; opened with the default handler"
                    ));
                }
                found
            }
            None => None,
        };
        self.driver.open_url(url, browser_path.as_deref())?;
        info!("Opened {}", url);

        let Some(hint) = self.hints.derive(url) else {
            return Ok(result.with_diagnostic(format!("no domain hint for '{url}'")));
        };
        debug!("Waiting for a title containing '{}' ({:?})", hint.hint, hint.source);

        let max_wait = timeout.unwrap_or(Duration::from_millis(self.config.navigation_max_wait_ms));
        let polled = poll_until(self.poll_interval(), max_wait, cancel, |_| {
            Ok(self
                .driver
                .windows()?
                .into_iter()
                .find(|w| w.title_contains(&hint.hint)))
        })
        .await?;
        result.retry_count = polled.retry_count();

        match polled.value {
            Some(window) => {
                if self.hints.learn(&hint.host, &window.title).is_some() {
                    debug!("Updated domain hint for '{}'", hint.host);
                }
                if hint.source == HintSource::Learned {
                    result = result.with_diagnostic(format!("used learned hint '{}'", hint.hint));
                }
                Ok(result.with_window(window))
            }
            None => {
                warn!(
                    "No window title contained '{}' within {:?} after opening {}",
                    hint.hint, max_wait, url
                );
                Ok(result.with_diagnostic(format!(
                    "page readiness not confirmed: no title contained '{}' within {}ms",
                    hint.hint,
                    max_wait.as_millis()
                )))
            }
        }
    }

    /// Starts a process and waits for input idle, a visible main window, and a
    /// populated element tree, in that order.
    async fn launch(
        &self,
        path: &str,
        args: &[String],
        window_title: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ActionResult, AutomationError> {
        let pid = self.driver.launch(path, args)?;
        info!("Launched '{}' (pid {})", path, pid);
        let mut result = ActionResult::ok();

        let driver = Arc::clone(&self.driver);
        let idle_timeout = Duration::from_millis(self.config.input_idle_timeout_ms);
        let idle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(crate::wait::cancelled_error("launch")),
            joined = tokio::task::spawn_blocking(move || driver.wait_for_input_idle(pid, idle_timeout)) => {
                joined.map_err(|e| AutomationError::Internal(format!("input idle wait panicked: {e}")))?
            }
        };
        match idle {
            Ok(true) => debug!("pid {} reached input idle", pid),
            Ok(false) => result = result.with_diagnostic("no input-idle signal"),
            Err(e) => {
                debug!("Input idle wait for pid {} failed: {}", pid, e);
                result = result.with_diagnostic(format!("input idle wait failed: {e}"));
            }
        }

        // Packaged apps often hand off to another process, so fall back to
        // the title hint or the executable stem.
        let stem = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .map(strip_exe)
            .unwrap_or(path)
            .to_string();
        let polled = poll_until(
            self.poll_interval(),
            Duration::from_millis(self.config.launch_max_wait_ms),
            cancel,
            |_| {
                if let Some(w) = self.driver.main_window(pid)? {
                    if !w.bounds.is_empty() {
                        return Ok(Some(w));
                    }
                }
                let fallback = match window_title {
                    Some(title) => self.driver.find_window(None, Some(title))?,
                    None => self
                        .driver
                        .windows()?
                        .into_iter()
                        .find(|w| w.process_matches(&stem) || w.title_contains(&stem)),
                };
                Ok(fallback.filter(|w| !w.bounds.is_empty()))
            },
        )
        .await?;
        result.retry_count = polled.retry_count();

        let Some(window) = polled.value else {
            return Ok(ActionResult {
                success: false,
                error: Some(format!(
                    "no window for '{path}' appeared within {}ms",
                    self.config.launch_max_wait_ms
                )),
                ..result
            });
        };

        let populated = poll_until(
            self.poll_interval(),
            Duration::from_millis(self.config.tree_populate_wait_ms),
            cancel,
            |_| match self.driver.child_count(&window) {
                Ok(n) if n >= 1 => Ok(Some(n)),
                Ok(_) => Ok(None),
                Err(e) if e.is_transient() => Ok(None),
                Err(e) => Err(e),
            },
        )
        .await?;
        if populated.timed_out() {
            warn!("Window '{}' has no UI children yet", window.title);
            result = result.with_diagnostic("element tree not populated before timeout");
        }

        info!("'{}' is ready in window '{}'", path, window.title);
        Ok(result.with_window(window))
    }
}

/// Find a browser executable: an existing path, a known install location,
/// then the `PATH`.
pub fn resolve_browser(name: &str) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.is_file() {
        return Some(direct.to_path_buf());
    }

    let key = strip_exe(name).to_lowercase();
    let key = match key.as_str() {
        "edge" | "microsoft edge" => "msedge".to_string(),
        "google chrome" => "chrome".to_string(),
        _ => key,
    };

    for (browser, env_var, relative) in BROWSER_INSTALL_LOCATIONS {
        if *browser != key {
            continue;
        }
        if let Some(base) = std::env::var_os(env_var) {
            let candidate = Path::new(&base).join(relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        [key.clone(), format!("{key}.exe")]
            .into_iter()
            .map(|file| dir.join(file))
            .find(|candidate| candidate.is_file())
    })
}
