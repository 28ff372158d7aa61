use super::utils::{bounds_of, map_uia_error, move_mouse, ThreadSafeWinUIElement};
use crate::element::{ElementSnapshot, ScrollDirection, UIElementImpl};
use crate::AutomationError;
use std::fmt;
use tracing::debug;
use uiautomation::patterns;
use uiautomation::types::ScrollAmount;

pub struct WindowsUIElement {
    pub(crate) element: ThreadSafeWinUIElement,
}

impl fmt::Debug for WindowsUIElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowsUIElement")
            .field("name", &self.element.0.get_name().unwrap_or_default())
            .finish()
    }
}

impl WindowsUIElement {
    pub(crate) fn new(element: uiautomation::UIElement) -> Self {
        Self {
            element: ThreadSafeWinUIElement(std::sync::Arc::new(element)),
        }
    }

    fn runtime_id(&self) -> Option<String> {
        self.element.0.get_runtime_id().ok().map(|ids| {
            ids.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(".")
        })
    }
}

impl UIElementImpl for WindowsUIElement {
    fn snapshot(&self) -> Result<ElementSnapshot, AutomationError> {
        let el = &self.element.0;
        // control type is the cheapest property and fails first on a stale element
        let control_type = el.get_control_type().map_err(map_uia_error)?;
        Ok(ElementSnapshot {
            role: control_type.to_string(),
            name: el.get_name().unwrap_or_default(),
            automation_id: el.get_automation_id().unwrap_or_default(),
            enabled: el.is_enabled().unwrap_or(false),
            visible: el.is_offscreen().map(|off| !off).unwrap_or(false),
            bounds: bounds_of(el),
            runtime_id: self.runtime_id(),
        })
    }

    fn click(&self) -> Result<(), AutomationError> {
        self.element.0.try_focus();
        match self.element.0.click() {
            Ok(()) => Ok(()),
            Err(click_err) => {
                debug!("mouse click failed ({}), trying InvokePattern", click_err);
                let invoke = self
                    .element
                    .0
                    .get_pattern::<patterns::UIInvokePattern>()
                    .map_err(|_| map_uia_error(click_err))?;
                invoke.invoke().map_err(map_uia_error)
            }
        }
    }

    fn focus(&self) -> Result<(), AutomationError> {
        self.element.0.set_focus().map_err(map_uia_error)
    }

    fn value(&self) -> Result<Option<String>, AutomationError> {
        match self.element.0.get_pattern::<patterns::UIValuePattern>() {
            Ok(pattern) => Ok(Some(pattern.get_value().map_err(map_uia_error)?)),
            Err(_) => Ok(None),
        }
    }

    fn scroll(&self, direction: ScrollDirection, amount: f64) -> Result<(), AutomationError> {
        let pattern = self
            .element
            .0
            .get_pattern::<patterns::UIScrollPattern>()
            .map_err(|e| {
                AutomationError::UnsupportedOperation(format!("no ScrollPattern: {e}"))
            })?;
        let (horizontal, vertical) = match direction {
            ScrollDirection::Up => (ScrollAmount::NoAmount, ScrollAmount::SmallDecrement),
            ScrollDirection::Down => (ScrollAmount::NoAmount, ScrollAmount::SmallIncrement),
            ScrollDirection::Left => (ScrollAmount::SmallDecrement, ScrollAmount::NoAmount),
            ScrollDirection::Right => (ScrollAmount::SmallIncrement, ScrollAmount::NoAmount),
        };
        for _ in 0..(amount.round().max(1.0) as usize) {
            pattern
                .scroll(horizontal, vertical)
                .map_err(map_uia_error)?;
        }
        Ok(())
    }

    fn hover(&self) -> Result<(), AutomationError> {
        let bounds = bounds_of(&self.element.0);
        if bounds.is_empty() {
            return Err(AutomationError::ElementDetached(
                "element has no on-screen bounds to hover".to_string(),
            ));
        }
        let (x, y) = bounds.center();
        move_mouse(x, y)
    }

    fn clone_box(&self) -> Box<dyn UIElementImpl> {
        Box::new(WindowsUIElement {
            element: self.element.clone(),
        })
    }
}
