use crate::errors::AutomationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;

/// Screen-space rectangle of an element, in physical pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.area() <= 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Owned, point-in-time copy of an element's properties.
///
/// Snapshots never keep the platform object alive. Anything that needs to
/// act on the element again has to re-resolve it through the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    pub role: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub automation_id: String,
    pub enabled: bool,
    /// `false` when the platform reports the element as off-screen.
    pub visible: bool,
    pub bounds: Bounds,
    /// Platform runtime id, if the driver can re-acquire elements by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
}

impl ElementSnapshot {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: String::new(),
            automation_id: String::new(),
            enabled: true,
            visible: true,
            bounds: Bounds::default(),
            runtime_id: None,
        }
    }

    /// A display label suitable for log lines and report diagnostics.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            format!("{}|{}", self.role, self.name)
        } else if !self.automation_id.is_empty() {
            format!("{}#{}", self.role, self.automation_id)
        } else {
            self.role.clone()
        }
    }
}

/// Native identity of a top-level window (HWND on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Owned description of a top-level window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    pub process_name: String,
    pub process_id: u32,
    pub bounds: Bounds,
}

impl WindowInfo {
    pub fn title_contains(&self, fragment: &str) -> bool {
        self.title.to_lowercase().contains(&fragment.to_lowercase())
    }

    /// Matches `name` against the process name with or without a `.exe` suffix.
    pub fn process_matches(&self, name: &str) -> bool {
        let wanted = strip_exe(name).to_lowercase();
        !wanted.is_empty() && strip_exe(&self.process_name).to_lowercase() == wanted
    }
}

pub(crate) fn strip_exe(name: &str) -> &str {
    name.strip_suffix(".exe")
        .or_else(|| name.strip_suffix(".EXE"))
        .unwrap_or(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn is_horizontal(&self) -> bool {
        matches!(self, ScrollDirection::Left | ScrollDirection::Right)
    }

    /// Wheel delta sign: positive scrolls up/right.
    pub fn wheel_sign(&self) -> i32 {
        match self {
            ScrollDirection::Up | ScrollDirection::Right => 1,
            ScrollDirection::Down | ScrollDirection::Left => -1,
        }
    }
}

impl std::str::FromStr for ScrollDirection {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(AutomationError::InvalidArgument(format!(
                "Invalid scroll direction '{other}'. Supported: 'up', 'down', 'left', 'right'"
            ))),
        }
    }
}

/// Holds the screenshot data
#[derive(Debug, Clone)]
pub struct ScreenshotResult {
    /// Raw RGBA pixels
    pub image_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Platform side of a live element handle.
///
/// Implementations may fail with [`AutomationError::ElementDetached`] at any
/// point once the platform has invalidated the underlying object.
pub trait UIElementImpl: Send + Sync + Debug {
    fn snapshot(&self) -> Result<ElementSnapshot, AutomationError>;
    /// Primary interaction (invoke pattern or mouse click).
    fn click(&self) -> Result<(), AutomationError>;
    fn focus(&self) -> Result<(), AutomationError>;
    /// Structured value, if the element exposes one.
    fn value(&self) -> Result<Option<String>, AutomationError>;
    /// Structured scroll. `UnsupportedOperation` means the caller should fall back to the wheel.
    fn scroll(&self, direction: ScrollDirection, amount: f64) -> Result<(), AutomationError>;
    fn hover(&self) -> Result<(), AutomationError>;
    fn clone_box(&self) -> Box<dyn UIElementImpl>;
}

/// A live element handle, valid only for the duration of one engine call.
#[derive(Debug)]
pub struct UIElement {
    inner: Box<dyn UIElementImpl>,
}

impl UIElement {
    pub fn new(inner: Box<dyn UIElementImpl>) -> Self {
        Self { inner }
    }

    pub fn snapshot(&self) -> Result<ElementSnapshot, AutomationError> {
        self.inner.snapshot()
    }

    pub fn click(&self) -> Result<(), AutomationError> {
        self.inner.click()
    }

    pub fn focus(&self) -> Result<(), AutomationError> {
        self.inner.focus()
    }

    pub fn value(&self) -> Result<Option<String>, AutomationError> {
        self.inner.value()
    }

    pub fn scroll(&self, direction: ScrollDirection, amount: f64) -> Result<(), AutomationError> {
        self.inner.scroll(direction, amount)
    }

    pub fn hover(&self) -> Result<(), AutomationError> {
        self.inner.hover()
    }

    /// Text for assertions: structured value first, display name second.
    pub fn text(&self) -> Result<String, AutomationError> {
        match self.inner.value()? {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Ok(self.inner.snapshot()?.name),
        }
    }
}

impl Clone for UIElement {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_box(),
        }
    }
}
