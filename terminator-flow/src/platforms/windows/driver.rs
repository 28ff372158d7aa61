use super::element::WindowsUIElement;
use super::utils::{
    bounds_of, create_ui_automation_with_com_init, handle_to_hwnd, hwnd_to_handle,
    map_role_to_control_type, map_uia_error, send_unicode_char, send_wheel, HandleGuard,
    ThreadSafeWinUIAutomation,
};
use crate::element::{strip_exe, ElementSnapshot, ScreenshotResult, UIElement, WindowInfo};
use crate::platforms::AccessibilityDriver;
use crate::AutomationError;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument, warn};
use uiautomation::inputs::Keyboard;
use uiautomation::types::{Handle, TreeScope, UIProperty};
use uiautomation::variants::Variant;
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::{WAIT_FAILED, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_SYNCHRONIZE,
};
use windows::Win32::UI::Shell::ShellExecuteW;
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, IsIconic, SetForegroundWindow, ShowWindow, WaitForInputIdle, SW_RESTORE,
    SW_SHOWNORMAL,
};

/// Accessibility driver backed by Windows UI Automation.
pub struct WindowsDriver {
    automation: ThreadSafeWinUIAutomation,
}

impl WindowsDriver {
    pub fn new() -> Result<Self, AutomationError> {
        let automation = create_ui_automation_with_com_init()?;
        Ok(Self {
            automation: ThreadSafeWinUIAutomation(automation),
        })
    }

    fn window_element(&self, window: &WindowInfo) -> Result<uiautomation::UIElement, AutomationError> {
        self.automation
            .0
            .element_from_handle(Handle::from(handle_to_hwnd(window.handle)))
            .map_err(|e| match map_uia_error(e) {
                AutomationError::PlatformError(msg) => AutomationError::WindowNotFound(format!(
                    "window {} ('{}'): {msg}",
                    window.handle, window.title
                )),
                other => other,
            })
    }

    fn process_names(pids: &[u32]) -> std::collections::HashMap<u32, String> {
        let pids: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&pids), true);
        pids.iter()
            .filter_map(|pid| {
                system.process(*pid).map(|p| {
                    let name = p.name().to_string_lossy().to_string();
                    (pid.as_u32(), strip_exe(&name).to_string())
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl AccessibilityDriver for WindowsDriver {
    #[instrument(level = "trace", skip(self))]
    fn windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        let automation = &self.automation.0;
        let root = automation.get_root_element().map_err(map_uia_error)?;
        let condition = automation.create_true_condition().map_err(map_uia_error)?;
        let children = root
            .find_all(TreeScope::Children, &condition)
            .map_err(map_uia_error)?;

        let mut found: Vec<(uiautomation::UIElement, u32)> = Vec::with_capacity(children.len());
        for child in children {
            let Ok(pid) = child.get_process_id() else {
                continue;
            };
            found.push((child, pid as u32));
        }
        let pids: Vec<u32> = found.iter().map(|(_, pid)| *pid).collect();
        let names = Self::process_names(&pids);

        Ok(found
            .into_iter()
            .filter_map(|(el, pid)| {
                let hwnd: windows::Win32::Foundation::HWND =
                    el.get_native_window_handle().ok()?.into();
                if hwnd.0.is_null() {
                    return None;
                }
                Some(WindowInfo {
                    handle: hwnd_to_handle(hwnd),
                    title: el.get_name().unwrap_or_default(),
                    process_name: names.get(&pid).cloned().unwrap_or_default(),
                    process_id: pid,
                    bounds: bounds_of(&el),
                })
            })
            .collect())
    }

    fn descendants(
        &self,
        window: &WindowInfo,
        role: Option<&str>,
    ) -> Result<Vec<UIElement>, AutomationError> {
        let automation = &self.automation.0;
        let root = self.window_element(window)?;
        let condition = match role.and_then(map_role_to_control_type) {
            Some(control_type) => automation
                .create_property_condition(
                    UIProperty::ControlType,
                    Variant::from(control_type as i32),
                    None,
                )
                .map_err(map_uia_error)?,
            None => automation.create_true_condition().map_err(map_uia_error)?,
        };
        let elements = root
            .find_all(TreeScope::Descendants, &condition)
            .map_err(map_uia_error)?;
        debug!(
            "{} descendants in window {} for role {:?}",
            elements.len(),
            window.handle,
            role
        );
        Ok(elements
            .into_iter()
            .map(|el| UIElement::new(Box::new(WindowsUIElement::new(el))))
            .collect())
    }

    /// Targeted lookup of a cached element: by automation id when it has
    /// one, otherwise by name and control type. Either way the runtime id has
    /// to match, so a look-alike that replaced the element is not returned.
    fn reacquire(
        &self,
        window: &WindowInfo,
        snapshot: &ElementSnapshot,
    ) -> Result<Option<UIElement>, AutomationError> {
        let automation = &self.automation.0;
        let condition = if !snapshot.automation_id.is_empty() {
            automation.create_property_condition(
                UIProperty::AutomationId,
                Variant::from(snapshot.automation_id.as_str()),
                None,
            )
        } else if snapshot.runtime_id.is_some() && !snapshot.name.is_empty() {
            let by_name = automation
                .create_property_condition(
                    UIProperty::Name,
                    Variant::from(snapshot.name.as_str()),
                    None,
                )
                .map_err(map_uia_error)?;
            match map_role_to_control_type(&snapshot.role) {
                Some(control_type) => {
                    let by_type = automation
                        .create_property_condition(
                            UIProperty::ControlType,
                            Variant::from(control_type as i32),
                            None,
                        )
                        .map_err(map_uia_error)?;
                    automation.create_and_condition(by_name, by_type)
                }
                None => Ok(by_name),
            }
        } else {
            return Ok(None);
        }
        .map_err(map_uia_error)?;

        let root = self.window_element(window)?;
        let Ok(matches) = root.find_all(TreeScope::Descendants, &condition) else {
            return Ok(None);
        };
        for el in matches {
            let candidate = UIElement::new(Box::new(WindowsUIElement::new(el)));
            match candidate.snapshot() {
                Ok(fresh) if fresh.role == snapshot.role && fresh.runtime_id == snapshot.runtime_id => {
                    return Ok(Some(candidate));
                }
                Ok(_) => continue,
                Err(e) if e.is_transient() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn child_count(&self, window: &WindowInfo) -> Result<usize, AutomationError> {
        let automation = &self.automation.0;
        let root = self.window_element(window)?;
        let condition = automation.create_true_condition().map_err(map_uia_error)?;
        Ok(root
            .find_all(TreeScope::Children, &condition)
            .map_err(map_uia_error)?
            .len())
    }

    fn focus_window(&self, window: &WindowInfo) -> Result<(), AutomationError> {
        let hwnd = handle_to_hwnd(window.handle);
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            let _ = BringWindowToTop(hwnd);
            if !SetForegroundWindow(hwnd).as_bool() {
                debug!("SetForegroundWindow refused for {}", window.handle);
            }
        }
        if let Ok(el) = self.window_element(window) {
            let _ = el.set_focus();
        }
        Ok(())
    }

    fn send_keys(&self, keys: &str) -> Result<(), AutomationError> {
        Keyboard::new()
            .interval(10)
            .send_keys(keys)
            .map_err(|e| AutomationError::PlatformError(format!("send_keys '{keys}' failed: {e}")))
    }

    fn send_char(&self, ch: char) -> Result<(), AutomationError> {
        send_unicode_char(ch)
    }

    fn mouse_wheel(&self, delta: i32, horizontal: bool) -> Result<(), AutomationError> {
        send_wheel(delta, horizontal)
    }

    fn launch(&self, path: &str, args: &[String]) -> Result<u32, AutomationError> {
        let child = std::process::Command::new(path)
            .args(args)
            .spawn()
            .map_err(|e| AutomationError::PlatformError(format!("Failed to launch '{path}': {e}")))?;
        Ok(child.id())
    }

    fn wait_for_input_idle(&self, pid: u32, timeout: Duration) -> Result<bool, AutomationError> {
        let handle = match unsafe {
            OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_SYNCHRONIZE, false, pid)
        } {
            Ok(handle) => handle,
            Err(e) => {
                // stub launchers exit right after handing off
                debug!("Cannot open pid {} for input idle: {}", pid, e);
                return Ok(false);
            }
        };
        let _guard = HandleGuard(handle);
        let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
        let result = unsafe { WaitForInputIdle(handle, millis) };
        if result == WAIT_TIMEOUT.0 {
            Ok(false)
        } else if result == WAIT_FAILED.0 {
            // console and service processes have no message queue
            Ok(false)
        } else {
            Ok(true)
        }
    }

    fn main_window(&self, pid: u32) -> Result<Option<WindowInfo>, AutomationError> {
        Ok(self
            .windows()?
            .into_iter()
            .filter(|w| w.process_id == pid)
            .max_by(|a, b| {
                a.bounds
                    .area()
                    .partial_cmp(&b.bounds.area())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }))
    }

    fn open_url(&self, url: &str, browser: Option<&Path>) -> Result<(), AutomationError> {
        let url_hstring = HSTRING::from(url);
        let verb_hstring = HSTRING::from("open");
        let verb = PCWSTR(verb_hstring.as_ptr());

        let hinstance = match browser {
            Some(exe) => {
                let exe_hstring = HSTRING::from(exe.as_os_str());
                unsafe {
                    ShellExecuteW(
                        None,
                        verb,
                        PCWSTR(exe_hstring.as_ptr()),
                        PCWSTR(url_hstring.as_ptr()),
                        PCWSTR::null(),
                        SW_SHOWNORMAL,
                    )
                }
            }
            None => unsafe {
                ShellExecuteW(
                    None,
                    verb,
                    PCWSTR(url_hstring.as_ptr()),
                    PCWSTR::null(),
                    PCWSTR::null(),
                    SW_SHOWNORMAL,
                )
            },
        };

        // values up to 32 are error codes
        if hinstance.0 as isize <= 32 {
            return Err(AutomationError::PlatformError(format!(
                "Failed to open '{url}': ShellExecuteW returned {}",
                hinstance.0 as isize
            )));
        }
        Ok(())
    }

    fn process_running(&self, name: &str) -> Result<bool, AutomationError> {
        let wanted = strip_exe(name).to_lowercase();
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        Ok(system.processes().values().any(|p| {
            let process = p.name().to_string_lossy();
            strip_exe(&process).to_lowercase() == wanted
        }))
    }

    async fn capture(
        &self,
        window: Option<&WindowInfo>,
    ) -> Result<ScreenshotResult, AutomationError> {
        let image = match window {
            Some(target) => {
                let windows = xcap::Window::all().map_err(|e| {
                    AutomationError::PlatformError(format!("Failed to get windows: {e}"))
                })?;
                let found = windows
                    .into_iter()
                    .find(|w| w.id().map(|id| id as u64 == target.handle.0).unwrap_or(false))
                    .ok_or_else(|| {
                        AutomationError::WindowNotFound(format!(
                            "no capturable window for {}",
                            target.handle
                        ))
                    })?;
                found.capture_image().map_err(|e| {
                    AutomationError::PlatformError(format!("Failed to capture window: {e}"))
                })?
            }
            None => {
                let monitors = xcap::Monitor::all().map_err(|e| {
                    AutomationError::PlatformError(format!("Failed to get monitors: {e}"))
                })?;
                let primary = monitors
                    .iter()
                    .position(|m| m.is_primary().unwrap_or(false))
                    .unwrap_or(0);
                let monitor = monitors.into_iter().nth(primary).ok_or_else(|| {
                    AutomationError::PlatformError("No monitor found".to_string())
                })?;
                monitor.capture_image().map_err(|e| {
                    AutomationError::PlatformError(format!("Failed to capture screen: {e}"))
                })?
            }
        };
        if image.width() == 0 || image.height() == 0 {
            warn!("Captured an empty image");
        }
        Ok(ScreenshotResult {
            width: image.width(),
            height: image.height(),
            image_data: image.to_vec(),
        })
    }
}
