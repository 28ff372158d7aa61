//! COM setup, handle conversions and raw input helpers for Windows

use crate::element::{Bounds, WindowHandle};
use crate::AutomationError;
use std::sync::Arc;
use uiautomation::controls::ControlType;
use uiautomation::UIAutomation;
use windows::core::HRESULT;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND};
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYEVENTF_KEYUP,
    KEYEVENTF_UNICODE, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_HWHEEL, MOUSEEVENTF_MOVE,
    MOUSEEVENTF_WHEEL, MOUSEINPUT, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

/// `RPC_E_CHANGED_MODE`: COM is already initialised on this thread.
const RPC_E_CHANGED_MODE: HRESULT = HRESULT(0x80010106u32 as i32);

/// Closes the wrapped handle on drop.
pub(crate) struct HandleGuard(pub(crate) HANDLE);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        unsafe {
            if !self.0.is_invalid() {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// Thread-safe wrapper for a UI Automation element
#[derive(Clone)]
pub(crate) struct ThreadSafeWinUIElement(pub(crate) Arc<uiautomation::UIElement>);

// Safety: the UIA client objects are free-threaded once COM is initialised MTA
unsafe impl Send for ThreadSafeWinUIElement {}
unsafe impl Sync for ThreadSafeWinUIElement {}

/// Thread-safe wrapper for the UI Automation client
pub(crate) struct ThreadSafeWinUIAutomation(pub(crate) UIAutomation);

unsafe impl Send for ThreadSafeWinUIAutomation {}
unsafe impl Sync for ThreadSafeWinUIAutomation {}

impl From<uiautomation::Error> for AutomationError {
    fn from(error: uiautomation::Error) -> Self {
        map_uia_error(error)
    }
}

/// Classify a UIA failure. A stale element becomes `ElementDetached`.
pub(crate) fn map_uia_error(error: uiautomation::Error) -> AutomationError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if lower.contains("elementnotavailable")
        || lower.contains("0x80040201")
        || lower.contains("-2147220991")
        || lower.contains("element not available")
    {
        AutomationError::ElementDetached(message)
    } else {
        AutomationError::PlatformError(format!("UIAutomation error: {message}"))
    }
}

/// Create a UIAutomation client, initialising COM on the calling thread.
pub(crate) fn create_ui_automation_with_com_init() -> Result<UIAutomation, AutomationError> {
    unsafe {
        let hr = CoInitializeEx(None, COINIT_MULTITHREADED);
        if hr.is_err() && hr != RPC_E_CHANGED_MODE {
            return Err(AutomationError::PlatformError(format!(
                "Failed to initialize COM: {hr}"
            )));
        }
    }
    UIAutomation::new_direct().map_err(|e| AutomationError::PlatformError(e.to_string()))
}

pub(crate) fn hwnd_to_handle(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as usize as u64)
}

pub(crate) fn handle_to_hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as usize as *mut core::ffi::c_void)
}

pub(crate) fn bounds_of(element: &uiautomation::UIElement) -> Bounds {
    element
        .get_bounding_rectangle()
        .map(|r| {
            Bounds::new(
                r.get_left() as f64,
                r.get_top() as f64,
                r.get_width() as f64,
                r.get_height() as f64,
            )
        })
        .unwrap_or_default()
}

/// Selector role names to UIA control types. `None` for roles UIA has no
/// type for, which then match on the reported role name alone.
pub(crate) fn map_role_to_control_type(role: &str) -> Option<ControlType> {
    let control_type = match role.to_lowercase().as_str() {
        "pane" | "app" | "application" => ControlType::Pane,
        "window" | "dialog" => ControlType::Window,
        "button" => ControlType::Button,
        "checkbox" => ControlType::CheckBox,
        "combobox" => ControlType::ComboBox,
        "edit" | "textbox" | "url" | "urlfield" => ControlType::Edit,
        "text" => ControlType::Text,
        "hyperlink" | "link" => ControlType::Hyperlink,
        "list" => ControlType::List,
        "listitem" => ControlType::ListItem,
        "menu" => ControlType::Menu,
        "menuitem" => ControlType::MenuItem,
        "menubar" => ControlType::MenuBar,
        "tab" => ControlType::Tab,
        "tabitem" => ControlType::TabItem,
        "tree" => ControlType::Tree,
        "treeitem" => ControlType::TreeItem,
        "group" => ControlType::Group,
        "image" => ControlType::Image,
        "document" => ControlType::Document,
        "radiobutton" => ControlType::RadioButton,
        "slider" => ControlType::Slider,
        "scrollbar" => ControlType::ScrollBar,
        "toolbar" => ControlType::ToolBar,
        "titlebar" | "title" => ControlType::TitleBar,
        "statusbar" => ControlType::StatusBar,
        "splitbutton" => ControlType::SplitButton,
        "dataitem" | "data" => ControlType::DataItem,
        "datagrid" => ControlType::DataGrid,
        "table" => ControlType::Table,
        "header" => ControlType::Header,
        "headeritem" => ControlType::HeaderItem,
        "custom" => ControlType::Custom,
        _ => return None,
    };
    Some(control_type)
}

fn send_inputs(inputs: &[INPUT]) -> Result<(), AutomationError> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(AutomationError::PlatformError(format!(
            "SendInput injected {sent} of {} events",
            inputs.len()
        )));
    }
    Ok(())
}

fn unicode_key(unit: u16, up: bool) -> INPUT {
    let flags = if up {
        KEYEVENTF_UNICODE | KEYEVENTF_KEYUP
    } else {
        KEYEVENTF_UNICODE
    };
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: unit,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

/// Inject one character as unicode key events, surrogate pairs included.
pub(crate) fn send_unicode_char(ch: char) -> Result<(), AutomationError> {
    let mut buf = [0u16; 2];
    let inputs: Vec<INPUT> = ch
        .encode_utf16(&mut buf)
        .iter()
        .flat_map(|&unit| [unicode_key(unit, false), unicode_key(unit, true)])
        .collect();
    send_inputs(&inputs)
}

pub(crate) fn send_wheel(delta: i32, horizontal: bool) -> Result<(), AutomationError> {
    let input = INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: delta as u32,
                dwFlags: if horizontal {
                    MOUSEEVENTF_HWHEEL
                } else {
                    MOUSEEVENTF_WHEEL
                },
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };
    send_inputs(&[input])
}

/// Move the cursor to screen coordinates.
pub(crate) fn move_mouse(x: f64, y: f64) -> Result<(), AutomationError> {
    let screen_w = unsafe { GetSystemMetrics(SM_CXSCREEN) }.max(1);
    let screen_h = unsafe { GetSystemMetrics(SM_CYSCREEN) }.max(1);
    let input = INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: ((x / screen_w as f64) * 65535.0).round() as i32,
                dy: ((y / screen_h as f64) * 65535.0).round() as i32,
                mouseData: 0,
                dwFlags: MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };
    send_inputs(&[input])
}
