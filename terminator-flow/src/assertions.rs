//! Post-condition evaluation.

use crate::config::{AssertionConfig, NotExistsMode};
use crate::element::WindowInfo;
use crate::flow::{Assertion, AssertionKind};
use crate::report::AssertionResult;
use crate::resolver::SelectorResolver;
use crate::wait::poll_until;
use crate::AutomationError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Evaluates one assertion at a time against a window.
///
/// Not-found and mismatch outcomes come back as failed [`AssertionResult`]s.
/// So is a selector the strict ambiguity policy rejects. `Err` is reserved
/// for caller errors, cancellation and platform failures.
pub struct AssertionEvaluator {
    resolver: Arc<SelectorResolver>,
    config: AssertionConfig,
    default_timeout: Duration,
}

fn text_matches(actual: &str, expected: &str, exact: bool) -> bool {
    let actual = actual.trim().to_lowercase();
    let expected = expected.trim().to_lowercase();
    if exact {
        actual == expected
    } else {
        actual.contains(&expected)
    }
}

fn title_matches(title: &str, expected: &str, exact: bool) -> bool {
    if exact {
        title.trim().eq_ignore_ascii_case(expected.trim())
    } else {
        title.to_lowercase().contains(&expected.to_lowercase())
    }
}

impl AssertionEvaluator {
    pub fn new(
        resolver: Arc<SelectorResolver>,
        config: AssertionConfig,
        default_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            config,
            default_timeout,
        }
    }

    fn timeout_for(&self, assertion: &Assertion) -> Duration {
        assertion
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    #[instrument(level = "debug", skip(self, window, cancel), fields(kind = ?assertion.kind))]
    pub async fn evaluate(
        &self,
        assertion: &Assertion,
        window: Option<&WindowInfo>,
        cancel: &CancellationToken,
    ) -> Result<AssertionResult, AutomationError> {
        assertion.validate()?;
        let expected = assertion.describe_expected();

        match assertion.kind {
            AssertionKind::Exists => self.exists(assertion, window, expected, cancel).await,
            AssertionKind::NotExists => self.not_exists(assertion, window, expected, cancel).await,
            AssertionKind::TextContains | AssertionKind::TextEquals => {
                self.text(assertion, window, expected, cancel).await
            }
            AssertionKind::WindowTitle => self.window_title(assertion, window, expected),
            AssertionKind::ProcessRunning => self.process_running(assertion, expected),
        }
    }

    async fn exists(
        &self,
        assertion: &Assertion,
        window: Option<&WindowInfo>,
        expected: String,
        cancel: &CancellationToken,
    ) -> Result<AssertionResult, AutomationError> {
        let Some(window) = window else {
            return Ok(AssertionResult::fail(expected, None, "no target window"));
        };
        let selector = assertion.selector.as_deref().unwrap_or_default();
        let timeout = self.timeout_for(assertion);

        let found = match self
            .resolver
            .resolve(window, selector, timeout, assertion.exact, cancel)
            .await
        {
            Ok(found) => found,
            Err(e) if e.is_resolution_failure() => {
                return Ok(AssertionResult::fail(expected, None, e.to_string()))
            }
            Err(e) => return Err(e),
        };
        match found {
            Some(found) => Ok(AssertionResult::pass(
                expected,
                Some(found.element.display_name()),
            )
            .with_attempts(found.retry_count + 1)),
            None => Ok(AssertionResult::fail(
                expected,
                None,
                format!("'{selector}' not found within {}ms", timeout.as_millis()),
            )),
        }
    }

    async fn not_exists(
        &self,
        assertion: &Assertion,
        window: Option<&WindowInfo>,
        expected: String,
        cancel: &CancellationToken,
    ) -> Result<AssertionResult, AutomationError> {
        // nothing to search means nothing exists
        let Some(window) = window else {
            return Ok(AssertionResult::pass(expected, None));
        };
        let selector = assertion.selector.as_deref().unwrap_or_default();

        match self.config.not_exists {
            NotExistsMode::Immediate => {
                match self
                    .resolver
                    .resolve_once(window, selector, assertion.exact, cancel)
                {
                    Ok(None) => Ok(AssertionResult::pass(expected, None)),
                    Ok(Some(found)) => Ok(AssertionResult::fail(
                        expected,
                        Some(found.element.display_name()),
                        format!("'{selector}' is still present"),
                    )),
                    // several matches are still a presence
                    Err(e @ AutomationError::AmbiguousSelector { .. }) => {
                        Ok(AssertionResult::fail(
                            expected,
                            None,
                            format!("'{selector}' is still present: {e}"),
                        ))
                    }
                    Err(e) => Err(e),
                }
            }
            NotExistsMode::UntilGone => {
                let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
                let mut last_seen = None;
                let polled = poll_until(interval, self.timeout_for(assertion), cancel, |_| {
                    match self
                        .resolver
                        .resolve_once(window, selector, assertion.exact, cancel)
                    {
                        Ok(None) => Ok(Some(())),
                        Ok(Some(found)) => {
                            last_seen = Some(found.element.display_name());
                            Ok(None)
                        }
                        Err(AutomationError::AmbiguousSelector { candidates, .. }) => {
                            last_seen = Some(format!("{candidates} matches"));
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    }
                })
                .await?;
                if polled.value.is_some() {
                    Ok(AssertionResult::pass(expected, None).with_attempts(polled.attempts))
                } else {
                    Ok(AssertionResult::fail(
                        expected,
                        last_seen,
                        format!("'{selector}' did not disappear"),
                    )
                    .with_attempts(polled.attempts))
                }
            }
        }
    }

    async fn text(
        &self,
        assertion: &Assertion,
        window: Option<&WindowInfo>,
        expected: String,
        cancel: &CancellationToken,
    ) -> Result<AssertionResult, AutomationError> {
        let Some(window) = window else {
            return Ok(AssertionResult::fail(expected, None, "no target window"));
        };
        let selector = assertion.selector.as_deref().unwrap_or_default();
        let wanted = assertion.expected.as_deref().unwrap_or_default();
        let exact = assertion.exact || assertion.kind == AssertionKind::TextEquals;

        let resolved = match self
            .resolver
            .resolve(window, selector, self.timeout_for(assertion), false, cancel)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) if e.is_resolution_failure() => {
                return Ok(AssertionResult::fail(expected, None, e.to_string()))
            }
            Err(e) => return Err(e),
        };
        let Some(found) = resolved else {
            return Ok(AssertionResult::fail(
                expected,
                None,
                format!("'{selector}' not found"),
            ));
        };
        let attempts = found.retry_count + 1;

        let actual = match found.handle.text() {
            Ok(text) => text,
            Err(e) if e.is_transient() => {
                debug!("Element for '{}' went away before its text was read", selector);
                return Ok(AssertionResult::fail(expected, None, e.to_string())
                    .with_attempts(attempts));
            }
            Err(e) => return Err(e),
        };

        let result = if text_matches(&actual, wanted, exact) {
            AssertionResult::pass(expected, Some(actual))
        } else {
            let verb = if exact { "equal" } else { "contain" };
            let error = format!("text '{actual}' does not {verb} '{wanted}'");
            AssertionResult::fail(expected, Some(actual), error)
        };
        Ok(result.with_attempts(attempts))
    }

    fn window_title(
        &self,
        assertion: &Assertion,
        window: Option<&WindowInfo>,
        expected: String,
    ) -> Result<AssertionResult, AutomationError> {
        let wanted = assertion.expected.as_deref().unwrap_or_default();
        let driver = self.resolver.driver();

        let current = match window {
            // titles change under navigation, so re-read rather than trust the snapshot
            Some(w) => driver.window_by_handle(w.handle)?,
            None => driver
                .windows()?
                .into_iter()
                .find(|w| title_matches(&w.title, wanted, assertion.exact)),
        };

        match current {
            Some(w) if title_matches(&w.title, wanted, assertion.exact) => {
                Ok(AssertionResult::pass(expected, Some(w.title)))
            }
            Some(w) => {
                let error = format!("window title '{}' does not match '{wanted}'", w.title);
                Ok(AssertionResult::fail(expected, Some(w.title), error))
            }
            None => Ok(AssertionResult::fail(expected, None, "no matching window")),
        }
    }

    fn process_running(
        &self,
        assertion: &Assertion,
        expected: String,
    ) -> Result<AssertionResult, AutomationError> {
        let name = assertion.expected.as_deref().unwrap_or_default();
        if self.resolver.driver().process_running(name)? {
            Ok(AssertionResult::pass(expected, Some(name.to_string())))
        } else {
            Ok(AssertionResult::fail(
                expected,
                None,
                format!("no process named '{name}' is running"),
            ))
        }
    }
}
