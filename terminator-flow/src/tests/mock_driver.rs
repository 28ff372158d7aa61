//! Scriptable in-memory driver for exercising the engine without a desktop.

use crate::element::{
    Bounds, ElementSnapshot, ScreenshotResult, ScrollDirection, UIElement, UIElementImpl,
    WindowHandle, WindowInfo,
};
use crate::platforms::AccessibilityDriver;
use crate::AutomationError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub type ClickEffect = Arc<dyn Fn(&mut MockState) + Send + Sync>;

#[derive(Clone)]
pub struct MockElement {
    pub id: usize,
    pub snapshot: ElementSnapshot,
    pub value: Option<String>,
    /// Hidden from this many `descendants` calls on its window.
    pub appear_after: u32,
    pub removed: bool,
    /// Every operation fails with `ElementDetached`.
    pub detached: bool,
    pub scrollable: bool,
    pub on_click: Option<ClickEffect>,
}

impl MockElement {
    pub fn new(role: &str, name: &str, automation_id: &str) -> Self {
        let mut snapshot = ElementSnapshot::new(role);
        snapshot.name = name.to_string();
        snapshot.automation_id = automation_id.to_string();
        snapshot.bounds = Bounds::new(0.0, 0.0, 40.0, 20.0);
        Self {
            id: 0,
            snapshot,
            value: None,
            appear_after: 0,
            removed: false,
            detached: false,
            scrollable: false,
            on_click: None,
        }
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn appearing_after(mut self, calls: u32) -> Self {
        self.appear_after = calls;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.snapshot.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.snapshot.enabled = false;
        self
    }

    pub fn sized(mut self, width: f64, height: f64) -> Self {
        self.snapshot.bounds = Bounds::new(0.0, 0.0, width, height);
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn scrollable(mut self) -> Self {
        self.scrollable = true;
        self
    }

    pub fn on_click(mut self, effect: impl Fn(&mut MockState) + Send + Sync + 'static) -> Self {
        self.on_click = Some(Arc::new(effect));
        self
    }
}

pub struct MockWindow {
    pub info: WindowInfo,
    pub elements: Vec<MockElement>,
    /// Hidden from this many `windows` calls.
    pub appear_after: u32,
    pub descendants_calls: u32,
}

/// What `launch` of a given executable brings up.
pub struct LaunchScript {
    pub path: String,
    pub title: String,
    pub process_name: String,
    pub elements: Vec<MockElement>,
    pub appear_after: u32,
}

/// What `open_url` brings up, matched by URL substring.
pub struct UrlScript {
    pub url_contains: String,
    pub title: String,
    pub appear_after: u32,
}

#[derive(Default)]
pub struct MockState {
    pub windows: Vec<MockWindow>,
    pub launch_scripts: Vec<LaunchScript>,
    pub url_scripts: Vec<UrlScript>,
    pub processes: HashSet<String>,
    pub traversals: usize,
    pub windows_calls: usize,
    pub typed: String,
    pub keys: Vec<String>,
    pub wheel: Vec<(i32, bool)>,
    pub opened_urls: Vec<(String, Option<String>)>,
    pub launched: Vec<String>,
    pub clicks: Vec<String>,
    pub hovered: Vec<String>,
    pub scrolled: Vec<(ScrollDirection, f64)>,
    pub focused_window: Option<WindowHandle>,
    focused_element: Option<(WindowHandle, usize)>,
    next_handle: u64,
    next_pid: u32,
    next_element: usize,
}

impl MockState {
    fn window_mut(&mut self, handle: WindowHandle) -> Option<&mut MockWindow> {
        self.windows.iter_mut().find(|w| w.info.handle == handle)
    }

    pub fn element_mut(&mut self, handle: WindowHandle, automation_id: &str) -> Option<&mut MockElement> {
        self.window_mut(handle)?
            .elements
            .iter_mut()
            .find(|e| e.snapshot.automation_id == automation_id)
    }

    /// Set the value of the first element with `automation_id` in any window.
    pub fn set_value(&mut self, automation_id: &str, value: &str) {
        for window in &mut self.windows {
            for element in &mut window.elements {
                if element.snapshot.automation_id == automation_id {
                    element.value = Some(value.to_string());
                    element.snapshot.name = value.to_string();
                }
            }
        }
    }

    pub fn remove(&mut self, automation_id: &str) {
        for window in &mut self.windows {
            for element in &mut window.elements {
                if element.snapshot.automation_id == automation_id {
                    element.removed = true;
                }
            }
        }
    }

    fn add_window(
        &mut self,
        title: &str,
        process_name: &str,
        pid: Option<u32>,
        elements: Vec<MockElement>,
        appear_after: u32,
    ) -> WindowInfo {
        self.next_handle += 0x10;
        let pid = pid.unwrap_or_else(|| {
            self.next_pid += 4;
            self.next_pid
        });
        let info = WindowInfo {
            handle: WindowHandle(0x1000 + self.next_handle),
            title: title.to_string(),
            process_name: process_name.to_string(),
            process_id: pid,
            bounds: Bounds::new(0.0, 0.0, 800.0, 600.0),
        };
        let elements = elements
            .into_iter()
            .map(|mut e| {
                self.next_element += 1;
                e.id = self.next_element;
                e.snapshot.runtime_id = Some(format!("42.{}", e.id));
                e
            })
            .collect();
        self.windows.push(MockWindow {
            info: info.clone(),
            elements,
            appear_after,
            descendants_calls: 0,
        });
        info
    }
}

#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        let driver = Self::default();
        driver.state.lock().next_pid = 1000;
        driver
    }

    pub fn add_window(&self, title: &str, process_name: &str, elements: Vec<MockElement>) -> WindowInfo {
        self.state
            .lock()
            .add_window(title, process_name, None, elements, 0)
    }

    pub fn script_launch(&self, script: LaunchScript) {
        self.state.lock().launch_scripts.push(script);
    }

    pub fn script_url(&self, url_contains: &str, title: &str, appear_after: u32) {
        self.state.lock().url_scripts.push(UrlScript {
            url_contains: url_contains.to_string(),
            title: title.to_string(),
            appear_after,
        });
    }

    pub fn add_process(&self, name: &str) {
        self.state.lock().processes.insert(name.to_lowercase());
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn traversals(&self) -> usize {
        self.state.lock().traversals
    }

    pub fn typed(&self) -> String {
        self.state.lock().typed.clone()
    }

    pub fn value_of(&self, automation_id: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .windows
            .iter()
            .flat_map(|w| w.elements.iter())
            .find(|e| e.snapshot.automation_id == automation_id)
            .and_then(|e| e.value.clone())
    }

    fn handle(&self, window: WindowHandle, id: usize) -> UIElement {
        UIElement::new(Box::new(MockElementHandle {
            state: Arc::clone(&self.state),
            window,
            id,
        }))
    }
}

#[derive(Clone)]
struct MockElementHandle {
    state: Arc<Mutex<MockState>>,
    window: WindowHandle,
    id: usize,
}

impl std::fmt::Debug for MockElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockElement({}/{})", self.window, self.id)
    }
}

impl MockElementHandle {
    fn with_element<R>(
        &self,
        f: impl FnOnce(&mut MockElement) -> R,
    ) -> Result<R, AutomationError> {
        let mut state = self.state.lock();
        let element = state
            .window_mut(self.window)
            .and_then(|w| w.elements.iter_mut().find(|e| e.id == self.id))
            .filter(|e| !e.removed && !e.detached)
            .ok_or_else(|| {
                AutomationError::ElementDetached(format!("mock element {} is gone", self.id))
            })?;
        Ok(f(element))
    }
}

impl UIElementImpl for MockElementHandle {
    fn snapshot(&self) -> Result<ElementSnapshot, AutomationError> {
        self.with_element(|e| e.snapshot.clone())
    }

    fn click(&self) -> Result<(), AutomationError> {
        let (effect, label) = self.with_element(|e| (e.on_click.clone(), e.snapshot.display_name()))?;
        let mut state = self.state.lock();
        state.clicks.push(label);
        state.focused_element = Some((self.window, self.id));
        state.focused_window = Some(self.window);
        if let Some(effect) = effect {
            effect(&mut *state);
        }
        Ok(())
    }

    fn focus(&self) -> Result<(), AutomationError> {
        self.with_element(|_| ())?;
        self.state.lock().focused_element = Some((self.window, self.id));
        Ok(())
    }

    fn value(&self) -> Result<Option<String>, AutomationError> {
        self.with_element(|e| e.value.clone())
    }

    fn scroll(&self, direction: ScrollDirection, amount: f64) -> Result<(), AutomationError> {
        let scrollable = self.with_element(|e| e.scrollable)?;
        if !scrollable {
            return Err(AutomationError::UnsupportedOperation(
                "mock element has no scroll pattern".to_string(),
            ));
        }
        self.state.lock().scrolled.push((direction, amount));
        Ok(())
    }

    fn hover(&self) -> Result<(), AutomationError> {
        let label = self.with_element(|e| e.snapshot.display_name())?;
        self.state.lock().hovered.push(label);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn UIElementImpl> {
        Box::new(self.clone())
    }
}

#[async_trait::async_trait]
impl AccessibilityDriver for MockDriver {
    fn windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        let mut state = self.state.lock();
        state.windows_calls += 1;
        let mut visible = Vec::new();
        for window in &mut state.windows {
            if window.appear_after > 0 {
                window.appear_after -= 1;
                continue;
            }
            visible.push(window.info.clone());
        }
        Ok(visible)
    }

    fn descendants(
        &self,
        window: &WindowInfo,
        role: Option<&str>,
    ) -> Result<Vec<UIElement>, AutomationError> {
        let ids: Vec<usize> = {
            let mut state = self.state.lock();
            state.traversals += 1;
            let target = state.window_mut(window.handle).ok_or_else(|| {
                AutomationError::WindowNotFound(format!("mock window {}", window.handle))
            })?;
            let call = target.descendants_calls;
            target.descendants_calls += 1;
            target
                .elements
                .iter()
                .filter(|e| !e.removed && call >= e.appear_after)
                .filter(|e| role.map_or(true, |r| e.snapshot.role.eq_ignore_ascii_case(r)))
                .map(|e| e.id)
                .collect()
        };
        Ok(ids.into_iter().map(|id| self.handle(window.handle, id)).collect())
    }

    fn reacquire(
        &self,
        window: &WindowInfo,
        snapshot: &ElementSnapshot,
    ) -> Result<Option<UIElement>, AutomationError> {
        // same lookup keys as the UIA driver: automation id, else name and role
        let by_id = !snapshot.automation_id.is_empty();
        if !by_id && (snapshot.runtime_id.is_none() || snapshot.name.is_empty()) {
            return Ok(None);
        }
        let state = self.state.lock();
        let found = state
            .windows
            .iter()
            .find(|w| w.info.handle == window.handle)
            .and_then(|w| {
                w.elements.iter().find(|e| {
                    let keyed = if by_id {
                        e.snapshot.automation_id == snapshot.automation_id
                    } else {
                        e.snapshot.name == snapshot.name && e.snapshot.role == snapshot.role
                    };
                    !e.removed && keyed && e.snapshot.runtime_id == snapshot.runtime_id
                })
            })
            .map(|e| e.id);
        drop(state);
        Ok(found.map(|id| self.handle(window.handle, id)))
    }

    fn child_count(&self, window: &WindowInfo) -> Result<usize, AutomationError> {
        let state = self.state.lock();
        Ok(state
            .windows
            .iter()
            .find(|w| w.info.handle == window.handle)
            .map(|w| w.elements.iter().filter(|e| !e.removed).count())
            .unwrap_or(0))
    }

    fn focus_window(&self, window: &WindowInfo) -> Result<(), AutomationError> {
        self.state.lock().focused_window = Some(window.handle);
        Ok(())
    }

    fn send_keys(&self, keys: &str) -> Result<(), AutomationError> {
        self.state.lock().keys.push(keys.to_string());
        Ok(())
    }

    fn send_char(&self, ch: char) -> Result<(), AutomationError> {
        let mut state = self.state.lock();
        state.typed.push(ch);
        if let Some((window, id)) = state.focused_element {
            if let Some(element) = state
                .window_mut(window)
                .and_then(|w| w.elements.iter_mut().find(|e| e.id == id))
            {
                element.value.get_or_insert_with(String::new).push(ch);
            }
        }
        Ok(())
    }

    fn mouse_wheel(&self, delta: i32, horizontal: bool) -> Result<(), AutomationError> {
        self.state.lock().wheel.push((delta, horizontal));
        Ok(())
    }

    fn launch(&self, path: &str, _args: &[String]) -> Result<u32, AutomationError> {
        let mut state = self.state.lock();
        state.launched.push(path.to_string());
        let index = state
            .launch_scripts
            .iter()
            .position(|s| s.path.eq_ignore_ascii_case(path))
            .ok_or_else(|| AutomationError::PlatformError(format!("cannot launch '{path}'")))?;
        let script = state.launch_scripts.remove(index);
        state.next_pid += 4;
        let pid = state.next_pid;
        state.processes.insert(script.process_name.to_lowercase());
        state.add_window(
            &script.title,
            &script.process_name,
            Some(pid),
            script.elements,
            script.appear_after,
        );
        Ok(pid)
    }

    fn wait_for_input_idle(&self, _pid: u32, _timeout: Duration) -> Result<bool, AutomationError> {
        Ok(true)
    }

    fn main_window(&self, pid: u32) -> Result<Option<WindowInfo>, AutomationError> {
        Ok(self.windows()?.into_iter().find(|w| w.process_id == pid))
    }

    fn open_url(&self, url: &str, browser: Option<&Path>) -> Result<(), AutomationError> {
        let mut state = self.state.lock();
        state
            .opened_urls
            .push((url.to_string(), browser.map(|b| b.display().to_string())));
        let script = state
            .url_scripts
            .iter()
            .find(|s| url.contains(&s.url_contains))
            .map(|s| (s.title.clone(), s.appear_after));
        if let Some((title, appear_after)) = script {
            state.add_window(&title, "chrome", None, Vec::new(), appear_after);
        }
        Ok(())
    }

    fn process_running(&self, name: &str) -> Result<bool, AutomationError> {
        let wanted = crate::element::strip_exe(name).to_lowercase();
        Ok(self.state.lock().processes.contains(&wanted))
    }

    async fn capture(
        &self,
        _window: Option<&WindowInfo>,
    ) -> Result<ScreenshotResult, AutomationError> {
        Ok(ScreenshotResult {
            image_data: vec![255; 2 * 2 * 4],
            width: 2,
            height: 2,
        })
    }
}
