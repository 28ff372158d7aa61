use crate::element::{ElementSnapshot, ScreenshotResult, UIElement, WindowHandle, WindowInfo};
use crate::AutomationError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// The capability the engine drives the desktop through.
///
/// Every call is a short, synchronous platform query or command; waiting and
/// retrying live above this trait. Implementations must be usable behind
/// `Arc<dyn AccessibilityDriver>` from any thread.
#[async_trait::async_trait]
pub trait AccessibilityDriver: Send + Sync {
    /// Enumerate visible top-level windows.
    fn windows(&self) -> Result<Vec<WindowInfo>, AutomationError>;

    /// Find a top-level window by process name and/or title substring.
    ///
    /// With both filters given a window must satisfy both. Title matching is
    /// case-insensitive.
    fn find_window(
        &self,
        process_name: Option<&str>,
        title: Option<&str>,
    ) -> Result<Option<WindowInfo>, AutomationError> {
        if process_name.is_none() && title.is_none() {
            return Ok(None);
        }
        Ok(self.windows()?.into_iter().find(|w| {
            process_name.map_or(true, |p| w.process_matches(p))
                && title.map_or(true, |t| w.title_contains(t))
        }))
    }

    /// Re-read a window by its native handle. `None` once the window is gone.
    fn window_by_handle(&self, handle: WindowHandle) -> Result<Option<WindowInfo>, AutomationError> {
        Ok(self.windows()?.into_iter().find(|w| w.handle == handle))
    }

    /// Full traversal of a window's element tree, filtered by role when given.
    fn descendants(
        &self,
        window: &WindowInfo,
        role: Option<&str>,
    ) -> Result<Vec<UIElement>, AutomationError>;

    /// Cheap re-acquisition of a previously resolved element.
    ///
    /// Drivers that cannot do better than a full traversal return `Ok(None)`.
    fn reacquire(
        &self,
        _window: &WindowInfo,
        _snapshot: &ElementSnapshot,
    ) -> Result<Option<UIElement>, AutomationError> {
        Ok(None)
    }

    /// Number of direct children under the window's root element.
    fn child_count(&self, window: &WindowInfo) -> Result<usize, AutomationError>;

    fn focus_window(&self, window: &WindowInfo) -> Result<(), AutomationError>;

    /// Send a key chord sequence (`{Ctrl}a`, `{Enter}`, ...) to the focused window.
    fn send_keys(&self, keys: &str) -> Result<(), AutomationError>;

    /// Inject a single character through low-level keyboard input.
    fn send_char(&self, ch: char) -> Result<(), AutomationError>;

    /// Generic wheel injection at the current cursor position.
    fn mouse_wheel(&self, delta: i32, horizontal: bool) -> Result<(), AutomationError>;

    /// Start a process and return its pid.
    fn launch(&self, path: &str, args: &[String]) -> Result<u32, AutomationError>;

    /// Block until the process reports input idle. `Ok(false)` when the
    /// process has no message loop or the wait timed out.
    fn wait_for_input_idle(&self, pid: u32, timeout: Duration) -> Result<bool, AutomationError>;

    /// Main window of a process, if one exists yet.
    fn main_window(&self, pid: u32) -> Result<Option<WindowInfo>, AutomationError>;

    /// Open a URL with the given browser executable, or the default handler.
    fn open_url(&self, url: &str, browser: Option<&Path>) -> Result<(), AutomationError>;

    fn process_running(&self, name: &str) -> Result<bool, AutomationError>;

    /// Capture a window, or the primary screen when `window` is `None`.
    async fn capture(
        &self,
        window: Option<&WindowInfo>,
    ) -> Result<ScreenshotResult, AutomationError>;
}

#[cfg(target_os = "windows")]
pub mod windows;

/// Create the appropriate driver for the current platform
pub fn create_driver() -> Result<Arc<dyn AccessibilityDriver>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsDriver::new()?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(AutomationError::UnsupportedPlatform(
            "Current platform is not supported".to_string(),
        ))
    }
}
