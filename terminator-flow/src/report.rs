//! Per-call results and the execution report they fold into.

use crate::element::WindowInfo;
use crate::flow::ActionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Outcome of one action.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub success: bool,
    pub error: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub diagnostics: Vec<String>,
    pub artifact: Option<PathBuf>,
    /// Window the action produced or switched to (launch, navigate, focus).
    pub window: Option<WindowInfo>,
    pub retry_count: u32,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_window(mut self, window: WindowInfo) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifact = Some(path);
        self
    }

    pub fn with_diagnostic(mut self, note: impl Into<String>) -> Self {
        self.diagnostics.push(note.into());
        self
    }
}

/// Outcome of one assertion. Mismatches are values, never errors.
#[derive(Debug, Clone, Default)]
pub struct AssertionResult {
    pub passed: bool,
    pub expected: String,
    pub actual: Option<String>,
    pub error: Option<String>,
    /// Zero-indexed poll attempt that settled the assertion.
    pub retry_count: u32,
    /// Probe calls made. Zero when the assertion did not need to poll.
    pub attempts: u32,
}

impl AssertionResult {
    pub fn pass(expected: impl Into<String>, actual: Option<String>) -> Self {
        Self {
            passed: true,
            expected: expected.into(),
            actual,
            ..Default::default()
        }
    }

    pub fn fail(
        expected: impl Into<String>,
        actual: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            passed: false,
            expected: expected.into(),
            actual,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self.retry_count = attempts.saturating_sub(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowVerdict {
    Passed,
    Failed,
    Error,
}

impl fmt::Display for FlowVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowVerdict::Passed => "passed",
            FlowVerdict::Failed => "failed",
            FlowVerdict::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    /// The step's `order` value.
    pub step: u32,
    /// Action name as authored, so unknown actions are still reported.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    /// Whether a failure here stops the flow.
    #[serde(default)]
    pub required: bool,
}

impl StepReport {
    pub fn new(step: u32, action: impl Into<String>, selector: Option<String>) -> Self {
        Self {
            step,
            action: action.into(),
            selector,
            status: StepStatus::Passed,
            error: None,
            expected: None,
            actual: None,
            elapsed_ms: 0,
            retry_count: 0,
            artifact: None,
            diagnostics: Vec::new(),
            required: false,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == StepStatus::Passed
    }

    pub fn kind(&self) -> Option<ActionKind> {
        self.action.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub test_name: String,
    pub result: FlowVerdict,
    pub steps: Vec<StepReport>,
    pub total_time_ms: u64,
    /// A non-required step failed but the flow kept going.
    #[serde(default)]
    pub degraded: bool,
    pub started_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn passed(&self) -> bool {
        self.result == FlowVerdict::Passed
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// One-line summary, e.g. `calculator: passed (4/4 steps passed, 812ms)`.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {} ({}/{} steps passed, {}ms)",
            self.test_name,
            self.result,
            self.count(StepStatus::Passed),
            self.steps.len(),
            self.total_time_ms
        );
        if self.degraded {
            line.push_str(" [degraded]");
        }
        if let Some(first) = self.steps.iter().find(|s| !s.is_passed()) {
            line.push_str(&format!(
                "; first problem at step {} ({}): {}",
                first.step,
                first.action,
                first.error.as_deref().unwrap_or("no details")
            ));
        }
        line
    }
}
