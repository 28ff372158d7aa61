//! Flow definitions as authored on the wire, and their validated form.

use crate::element::ScrollDirection;
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FLOW_TIMEOUT_SECONDS: u64 = 300;

fn default_flow_timeout() -> u64 {
    DEFAULT_FLOW_TIMEOUT_SECONDS
}

/// An ordered script of steps against one target application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub test_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_app: Option<String>,
    #[serde(default = "default_flow_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Treat every step as required.
    #[serde(default)]
    pub stop_on_failure: bool,
}

impl Flow {
    pub fn from_json(json: &str) -> Result<Self, AutomationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, AutomationError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a flow from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("json") => Self::from_json(&content),
            other => Err(AutomationError::InvalidArgument(format!(
                "unsupported flow file extension {other:?} for {}",
                path.display()
            ))),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Steps in execution order. Equal `order` values keep authoring order.
    pub fn ordered_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// One step as authored. Field presence is validated by [`Step::to_action`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub order: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, alias = "browser", skip_serializing_if = "Option::is_none")]
    pub process_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_amount: Option<f64>,
    #[serde(default)]
    pub delay_after_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub required: bool,
    /// Post-conditions checked after the action succeeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    SendKeys,
    Wait,
    AssertExists,
    AssertNotExists,
    AssertText,
    AssertWindow,
    Navigate,
    Screenshot,
    Scroll,
    FocusWindow,
    Launch,
    Hover,
}

impl ActionKind {
    pub const ALL: [ActionKind; 14] = [
        ActionKind::Click,
        ActionKind::Type,
        ActionKind::SendKeys,
        ActionKind::Wait,
        ActionKind::AssertExists,
        ActionKind::AssertNotExists,
        ActionKind::AssertText,
        ActionKind::AssertWindow,
        ActionKind::Navigate,
        ActionKind::Screenshot,
        ActionKind::Scroll,
        ActionKind::FocusWindow,
        ActionKind::Launch,
        ActionKind::Hover,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::SendKeys => "send_keys",
            ActionKind::Wait => "wait",
            ActionKind::AssertExists => "assert_exists",
            ActionKind::AssertNotExists => "assert_not_exists",
            ActionKind::AssertText => "assert_text",
            ActionKind::AssertWindow => "assert_window",
            ActionKind::Navigate => "navigate",
            ActionKind::Screenshot => "screenshot",
            ActionKind::Scroll => "scroll",
            ActionKind::FocusWindow => "focus_window",
            ActionKind::Launch => "launch",
            ActionKind::Hover => "hover",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        ActionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| {
                AutomationError::UnknownAction(format!(
                    "'{s}' is not one of: {}",
                    ActionKind::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

/// Validated, closed form of a step's physical effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click {
        selector: String,
    },
    Type {
        selector: Option<String>,
        text: String,
    },
    SendKeys {
        keys: String,
    },
    Wait {
        duration: Duration,
    },
    AssertExists {
        selector: String,
    },
    AssertNotExists {
        selector: String,
    },
    AssertText {
        selector: String,
        expected: String,
        exact: bool,
    },
    AssertWindow {
        expected: String,
        exact: bool,
    },
    Navigate {
        url: String,
        browser: Option<String>,
    },
    Screenshot {
        path: Option<String>,
    },
    Scroll {
        selector: Option<String>,
        direction: ScrollDirection,
        amount: f64,
    },
    FocusWindow {
        title: Option<String>,
    },
    Launch {
        path: String,
        args: Vec<String>,
        window_title: Option<String>,
    },
    Hover {
        selector: String,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::SendKeys { .. } => ActionKind::SendKeys,
            Action::Wait { .. } => ActionKind::Wait,
            Action::AssertExists { .. } => ActionKind::AssertExists,
            Action::AssertNotExists { .. } => ActionKind::AssertNotExists,
            Action::AssertText { .. } => ActionKind::AssertText,
            Action::AssertWindow { .. } => ActionKind::AssertWindow,
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Screenshot { .. } => ActionKind::Screenshot,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::FocusWindow { .. } => ActionKind::FocusWindow,
            Action::Launch { .. } => ActionKind::Launch,
            Action::Hover { .. } => ActionKind::Hover,
        }
    }

    /// Selector the orchestrator must resolve before running the action.
    ///
    /// Assertion actions resolve their own element, so they return `None`.
    pub fn target_selector(&self) -> Option<&str> {
        match self {
            Action::Click { selector } | Action::Hover { selector } => Some(selector),
            Action::Type { selector, .. } | Action::Scroll { selector, .. } => selector.as_deref(),
            _ => None,
        }
    }

    /// The assertion this action performs, if it is an assertion step.
    pub fn as_assertion(&self, timeout_ms: Option<u64>) -> Option<Assertion> {
        let (kind, selector, expected, exact) = match self {
            Action::AssertExists { selector } => {
                (AssertionKind::Exists, Some(selector.clone()), None, false)
            }
            Action::AssertNotExists { selector } => {
                (AssertionKind::NotExists, Some(selector.clone()), None, false)
            }
            Action::AssertText {
                selector,
                expected,
                exact,
            } => (
                if *exact {
                    AssertionKind::TextEquals
                } else {
                    AssertionKind::TextContains
                },
                Some(selector.clone()),
                Some(expected.clone()),
                *exact,
            ),
            Action::AssertWindow { expected, exact } => (
                AssertionKind::WindowTitle,
                None,
                Some(expected.clone()),
                *exact,
            ),
            _ => return None,
        };
        Some(Assertion {
            kind,
            selector,
            expected,
            exact,
            timeout_ms,
        })
    }
}

fn require(value: &Option<String>, field: &str, kind: ActionKind) -> Result<String, AutomationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(value.clone().unwrap_or_default()),
        _ => Err(AutomationError::InvalidArgument(format!(
            "'{kind}' step requires '{field}'"
        ))),
    }
}

impl Step {
    pub fn kind(&self) -> Result<ActionKind, AutomationError> {
        self.action.parse()
    }

    /// Validate required fields and build the closed action.
    pub fn to_action(&self) -> Result<Action, AutomationError> {
        let kind = self.kind()?;
        let exact = self.exact.unwrap_or(false);
        let action = match kind {
            ActionKind::Click => Action::Click {
                selector: require(&self.selector, "selector", kind)?,
            },
            ActionKind::Type => Action::Type {
                selector: self.selector.clone().filter(|s| !s.trim().is_empty()),
                // whitespace is legitimate text, only absence is an error
                text: self.text.clone().ok_or_else(|| {
                    AutomationError::InvalidArgument("'type' step requires 'text'".to_string())
                })?,
            },
            ActionKind::SendKeys => Action::SendKeys {
                keys: require(&self.keys, "keys", kind)?,
            },
            ActionKind::Wait => Action::Wait {
                duration: Duration::from_millis(self.timeout_ms.ok_or_else(|| {
                    AutomationError::InvalidArgument("'wait' step requires 'timeoutMs'".to_string())
                })?),
            },
            ActionKind::AssertExists => Action::AssertExists {
                selector: require(&self.selector, "selector", kind)?,
            },
            ActionKind::AssertNotExists => Action::AssertNotExists {
                selector: require(&self.selector, "selector", kind)?,
            },
            ActionKind::AssertText => Action::AssertText {
                selector: require(&self.selector, "selector", kind)?,
                expected: self
                    .contains
                    .clone()
                    .or_else(|| self.text.clone())
                    .ok_or_else(|| {
                        AutomationError::InvalidArgument(
                            "'assert_text' step requires 'contains' or 'text'".to_string(),
                        )
                    })?,
                exact,
            },
            ActionKind::AssertWindow => Action::AssertWindow {
                expected: self
                    .window_title
                    .clone()
                    .or_else(|| self.contains.clone())
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        AutomationError::InvalidArgument(
                            "'assert_window' step requires 'windowTitle'".to_string(),
                        )
                    })?,
                exact,
            },
            ActionKind::Navigate => Action::Navigate {
                url: require(&self.url, "url", kind)?,
                browser: self.process_path.clone().filter(|b| !b.trim().is_empty()),
            },
            ActionKind::Screenshot => Action::Screenshot {
                path: self.text.clone().filter(|p| !p.trim().is_empty()),
            },
            ActionKind::Scroll => Action::Scroll {
                selector: self.selector.clone().filter(|s| !s.trim().is_empty()),
                direction: self.direction.as_deref().unwrap_or("down").parse()?,
                amount: match self.scroll_amount {
                    Some(a) if a.is_finite() && a > 0.0 => a,
                    Some(a) => {
                        return Err(AutomationError::InvalidArgument(format!(
                            "'scroll' step has invalid 'scrollAmount' {a}"
                        )))
                    }
                    None => 3.0,
                },
            },
            ActionKind::FocusWindow => Action::FocusWindow {
                title: self.window_title.clone().filter(|t| !t.trim().is_empty()),
            },
            ActionKind::Launch => Action::Launch {
                path: require(&self.process_path, "processPath", kind)?,
                args: self.args.clone(),
                window_title: self.window_title.clone().filter(|t| !t.trim().is_empty()),
            },
            ActionKind::Hover => Action::Hover {
                selector: require(&self.selector, "selector", kind)?,
            },
        };
        Ok(action)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    #[serde(alias = "exists")]
    Exists,
    #[serde(alias = "not-exists")]
    NotExists,
    #[serde(alias = "text-contains")]
    TextContains,
    #[serde(alias = "text-equals")]
    TextEquals,
    #[serde(alias = "window-title")]
    WindowTitle,
    #[serde(alias = "process-running")]
    ProcessRunning,
}

impl AssertionKind {
    pub fn needs_element(&self) -> bool {
        matches!(
            self,
            AssertionKind::Exists
                | AssertionKind::NotExists
                | AssertionKind::TextContains
                | AssertionKind::TextEquals
        )
    }
}

/// A post-condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub kind: AssertionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default)]
    pub exact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Assertion {
    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.kind.needs_element()
            && self.selector.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            return Err(AutomationError::InvalidArgument(format!(
                "{:?} assertion requires 'selector'",
                self.kind
            )));
        }
        let needs_expected = matches!(
            self.kind,
            AssertionKind::TextContains
                | AssertionKind::TextEquals
                | AssertionKind::WindowTitle
                | AssertionKind::ProcessRunning
        );
        if needs_expected && self.expected.is_none() {
            return Err(AutomationError::InvalidArgument(format!(
                "{:?} assertion requires 'expected'",
                self.kind
            )));
        }
        Ok(())
    }

    /// Human-readable description used in report `expected` fields.
    pub fn describe_expected(&self) -> String {
        let expected = self.expected.as_deref().unwrap_or_default();
        let selector = self.selector.as_deref().unwrap_or_default();
        match self.kind {
            AssertionKind::Exists => format!("{selector} exists"),
            AssertionKind::NotExists => format!("{selector} does not exist"),
            AssertionKind::TextContains => format!("text contains '{expected}'"),
            AssertionKind::TextEquals => format!("text equals '{expected}'"),
            AssertionKind::WindowTitle if self.exact => format!("window title equals '{expected}'"),
            AssertionKind::WindowTitle => format!("window title contains '{expected}'"),
            AssertionKind::ProcessRunning => format!("process '{expected}' running"),
        }
    }
}
