//! Sequences a flow's steps into an [`ExecutionReport`].

use crate::assertions::AssertionEvaluator;
use crate::config::EngineConfig;
use crate::element::WindowInfo;
use crate::executor::{ActionExecutor, StepTarget};
use crate::flow::{Action, Flow, Step};
use crate::report::{ExecutionReport, FlowVerdict, StepReport, StepStatus};
use crate::resolver::SelectorResolver;
use crate::wait::{poll_until, sleep_cancellable};
use crate::AutomationError;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Cancellation token plus the flow's overall time budget.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    started: Instant,
    budget: Duration,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, budget: Duration) -> Self {
        Self {
            cancel,
            started: Instant::now(),
            budget,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn budget_exceeded(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

struct StepRun {
    report: StepReport,
    /// The failure came from an assertion rather than an action.
    check_failed: bool,
}

impl StepRun {
    fn fail(mut report: StepReport, status: StepStatus, error: impl Into<String>) -> Self {
        report.status = status;
        report.error = Some(error.into());
        Self {
            report,
            check_failed: false,
        }
    }
}

pub struct StepOrchestrator {
    resolver: Arc<SelectorResolver>,
    executor: ActionExecutor,
    evaluator: AssertionEvaluator,
    config: EngineConfig,
}

impl StepOrchestrator {
    pub fn new(
        resolver: Arc<SelectorResolver>,
        executor: ActionExecutor,
        evaluator: AssertionEvaluator,
        config: EngineConfig,
    ) -> Self {
        Self {
            resolver,
            executor,
            evaluator,
            config,
        }
    }

    /// Run every step in order and fold the outcomes into a report.
    ///
    /// Never fails: problems become step entries and the overall verdict.
    #[instrument(skip(self, flow, cancel), fields(flow = %flow.test_name))]
    pub async fn run(&self, flow: &Flow, cancel: CancellationToken) -> ExecutionReport {
        let started_at = Utc::now();
        let ctx = RunContext::new(cancel, flow.timeout());
        info!("Running flow '{}' with {} steps", flow.test_name, flow.steps.len());

        let mut reports: Vec<StepReport> = Vec::with_capacity(flow.steps.len());
        let mut window: Option<WindowInfo> = None;
        let mut degraded = false;
        let mut check_failed = false;
        let mut errored = false;

        for step in flow.ordered_steps() {
            let required = step.required || flow.stop_on_failure;

            if ctx.is_cancelled() {
                let mut report = StepReport::new(step.order, &step.action, step.selector.clone());
                report.status = StepStatus::Cancelled;
                report.error = Some("cancelled".to_string());
                report.required = required;
                reports.push(report);
                errored = true;
                break;
            }
            if ctx.budget_exceeded() {
                let mut report = StepReport::new(step.order, &step.action, step.selector.clone());
                report.status = StepStatus::Error;
                report.error = Some(format!(
                    "flow timeout of {}s exceeded before this step",
                    flow.timeout_seconds
                ));
                report.required = required;
                warn!("Flow '{}' ran out of time at step {}", flow.test_name, step.order);
                reports.push(report);
                errored = true;
                break;
            }

            let step_start = Instant::now();
            let run = AssertUnwindSafe(self.run_step(flow, step, &ctx, &mut window))
                .catch_unwind()
                .await;
            let mut run = match run {
                Ok(run) => run,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<String>()
                        .cloned()
                        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Step {} panicked: {}", step.order, message);
                    StepRun::fail(
                        StepReport::new(step.order, &step.action, step.selector.clone()),
                        StepStatus::Error,
                        format!("step panicked: {message}"),
                    )
                }
            };
            run.report.required = required;
            run.report.elapsed_ms = step_start.elapsed().as_millis() as u64;

            let status = run.report.status;
            match status {
                StepStatus::Passed => info!(
                    "Step {} ({}) passed in {}ms",
                    step.order, step.action, run.report.elapsed_ms
                ),
                _ => warn!(
                    "Step {} ({}) {:?}: {}",
                    step.order,
                    step.action,
                    status,
                    run.report.error.as_deref().unwrap_or_default()
                ),
            }
            reports.push(run.report);

            match status {
                StepStatus::Passed => {}
                StepStatus::Cancelled => {
                    errored = true;
                    break;
                }
                StepStatus::Error => {
                    errored = true;
                    if required {
                        break;
                    }
                    degraded = true;
                }
                StepStatus::Failed => {
                    if run.check_failed || required {
                        check_failed = true;
                    }
                    if required {
                        break;
                    }
                    degraded = true;
                }
            }
        }

        let result = if errored {
            FlowVerdict::Error
        } else if check_failed {
            FlowVerdict::Failed
        } else {
            FlowVerdict::Passed
        };
        let report = ExecutionReport {
            test_name: flow.test_name.clone(),
            result,
            steps: reports,
            total_time_ms: ctx.elapsed().as_millis() as u64,
            degraded,
            started_at,
        };
        info!("{}", report.summary());
        report
    }

    async fn run_step(
        &self,
        flow: &Flow,
        step: &Step,
        ctx: &RunContext,
        current_window: &mut Option<WindowInfo>,
    ) -> StepRun {
        let report = StepReport::new(step.order, &step.action, step.selector.clone());
        match self.try_run_step(flow, step, ctx, current_window, report.clone()).await {
            Ok(run) => run,
            Err(e) if e.is_cancelled() => StepRun::fail(report, StepStatus::Cancelled, "cancelled"),
            Err(e) if e.is_caller_error() => StepRun::fail(report, StepStatus::Failed, e.to_string()),
            Err(e) if e.is_resolution_failure() => {
                StepRun::fail(report, StepStatus::Failed, e.to_string())
            }
            Err(e) => {
                error!("Step {} hit a platform error: {}", step.order, e);
                StepRun::fail(report, StepStatus::Error, e.to_string())
            }
        }
    }

    async fn try_run_step(
        &self,
        flow: &Flow,
        step: &Step,
        ctx: &RunContext,
        current_window: &mut Option<WindowInfo>,
        mut report: StepReport,
    ) -> Result<StepRun, AutomationError> {
        let cancel = ctx.token();
        let action = step.to_action()?;
        let timeout = step
            .timeout()
            .unwrap_or_else(|| self.config.default_step_timeout());

        let window = if Self::needs_window(&action, step) {
            self.resolve_window(flow, step, &action, current_window.as_ref(), cancel)
                .await?
        } else {
            current_window.clone()
        };
        if window.is_some() {
            current_window.clone_from(&window);
        }

        let mut check_failed = false;

        if let Some(assertion) = action.as_assertion(Some(timeout.as_millis() as u64)) {
            let result = self
                .evaluator
                .evaluate(&assertion, window.as_ref(), cancel)
                .await?;
            report.expected = Some(result.expected);
            report.actual = result.actual;
            report.retry_count = result.retry_count;
            if !result.passed {
                report.status = StepStatus::Failed;
                report.error = result.error;
                check_failed = true;
            }
        } else {
            let resolved = match action.target_selector() {
                Some(selector) => {
                    let Some(target) = window.as_ref() else {
                        return Ok(StepRun::fail(
                            report,
                            StepStatus::Failed,
                            "target window not found",
                        ));
                    };
                    let exact = step.exact.unwrap_or(false);
                    match self
                        .resolver
                        .resolve(target, selector, timeout, exact, cancel)
                        .await?
                    {
                        Some(found) => {
                            report.retry_count = found.retry_count;
                            Some(found)
                        }
                        None => {
                            return Ok(StepRun::fail(
                                report,
                                StepStatus::Failed,
                                format!(
                                    "Element not found: '{selector}' within {}ms",
                                    timeout.as_millis()
                                ),
                            ))
                        }
                    }
                }
                None => None,
            };

            let target = StepTarget {
                element: resolved.as_ref().map(|m| &m.handle),
                window: window.as_ref(),
                timeout: step.timeout(),
            };
            let result = self.executor.execute(&action, target, cancel).await?;
            drop(resolved);

            report.retry_count = report.retry_count.max(result.retry_count);
            report.diagnostics = result.diagnostics;
            report.artifact = result.artifact.map(|p| p.display().to_string());
            report.expected = result.expected;
            report.actual = result.actual;
            if let Some(new_window) = result.window {
                *current_window = Some(new_window);
            }
            if !result.success {
                report.status = StepStatus::Failed;
                report.error = result.error;
            }
        }

        if report.status == StepStatus::Passed && !step.assertions.is_empty() {
            let target = current_window.clone();
            for assertion in &step.assertions {
                let result = self
                    .evaluator
                    .evaluate(assertion, target.as_ref(), cancel)
                    .await?;
                if !result.passed {
                    report.status = StepStatus::Failed;
                    report.error = Some(format!(
                        "post-assertion failed: {}",
                        result.error.as_deref().unwrap_or("mismatch")
                    ));
                    report.expected = Some(result.expected);
                    report.actual = result.actual;
                    check_failed = true;
                    break;
                }
            }
        }

        if step.delay_after_ms > 0 {
            sleep_cancellable(Duration::from_millis(step.delay_after_ms), cancel).await?;
        }

        Ok(StepRun {
            report,
            check_failed,
        })
    }

    fn needs_window(action: &Action, step: &Step) -> bool {
        if !step.assertions.is_empty() || action.target_selector().is_some() {
            return true;
        }
        matches!(
            action,
            Action::AssertExists { .. }
                | Action::AssertNotExists { .. }
                | Action::AssertText { .. }
                | Action::AssertWindow { .. }
        )
    }

    /// Step `windowTitle`, then the window the flow is already on, then the
    /// flow's `targetApp`.
    async fn resolve_window(
        &self,
        flow: &Flow,
        step: &Step,
        action: &Action,
        current: Option<&WindowInfo>,
        cancel: &CancellationToken,
    ) -> Result<Option<WindowInfo>, AutomationError> {
        let driver = self.resolver.driver();
        let interval = self.resolver.config().poll_interval();
        let wait = self.config.window_wait();

        // assert_window's windowTitle is the expected value, not a locator
        let title_hint = match action {
            Action::AssertWindow { .. } => None,
            _ => step.window_title.as_deref().filter(|t| !t.trim().is_empty()),
        };
        if let Some(title) = title_hint {
            let polled = poll_until(interval, wait, cancel, |_| {
                driver.find_window(None, Some(title))
            })
            .await?;
            if polled.value.is_none() {
                warn!("No window titled '{}' within {:?}", title, wait);
            }
            return Ok(polled.value);
        }

        if let Some(current) = current {
            if let Some(fresh) = driver.window_by_handle(current.handle)? {
                return Ok(Some(fresh));
            }
        }

        let Some(app) = flow.target_app.as_deref() else {
            return Ok(None);
        };
        let polled = poll_until(interval, wait, cancel, |_| {
            match driver.find_window(Some(app), None)? {
                Some(w) => Ok(Some(w)),
                None => driver.find_window(None, Some(app)),
            }
        })
        .await?;
        if polled.value.is_none() {
            warn!("Target app '{}' has no window after {:?}", app, wait);
        }
        Ok(polled.value)
    }
}
