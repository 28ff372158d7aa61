//! The shared poll-until-timeout combinator.
//!
//! Resolver retries, assertion retries and the launch/navigation readiness
//! waits all go through [`poll_until`], so they share one notion of time
//! (tokio's monotonic clock) and one cancellation rule: the token is checked
//! before every attempt and wins over any in-flight sleep.

use crate::AutomationError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Outcome of a finished poll.
#[derive(Debug)]
pub struct Polled<T> {
    /// `Some` when the probe succeeded before the deadline.
    pub value: Option<T>,
    /// Number of probe calls made. A first-try success reports 1.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> Polled<T> {
    /// Zero-indexed attempt that produced the value.
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn timed_out(&self) -> bool {
        self.value.is_none()
    }
}

pub(crate) fn cancelled_error(what: &str) -> AutomationError {
    AutomationError::Cancelled(format!("{what} was cancelled"))
}

/// Call `probe` every `interval` until it yields a value or `timeout` elapses.
///
/// The probe receives the zero-indexed attempt number. Attempt `k` starts at
/// roughly `k * interval`; the last attempt is the first one at or past the
/// deadline, so a timed-out poll never runs longer than `timeout + interval`.
/// A zero timeout makes exactly one attempt. Probe errors abort the poll.
pub async fn poll_until<T, F>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<Polled<T>, AutomationError>
where
    F: FnMut(u32) -> Result<Option<T>, AutomationError>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled_error("poll"));
        }

        let attempt = attempts;
        attempts += 1;
        if let Some(value) = probe(attempt)? {
            return Ok(Polled {
                value: Some(value),
                attempts,
                elapsed: start.elapsed(),
            });
        }

        let now = Instant::now();
        if now >= deadline {
            trace!(attempts, "poll deadline reached");
            return Ok(Polled {
                value: None,
                attempts,
                elapsed: now - start,
            });
        }

        let nap = interval.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled_error("poll")),
            _ = tokio::time::sleep(nap) => {}
        }
    }
}

/// Sleep for `duration` unless the token fires first.
pub async fn sleep_cancellable(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), AutomationError> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(cancelled_error("wait"))
        } else {
            Ok(())
        };
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled_error("wait")),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
