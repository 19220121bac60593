//! Fixed-interval polling with a hard attempt cap.
//!
//! Used by the backend health check and by model download progress polling.
//! There is no backoff and no jitter: every attempt is `interval` apart.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Probe errors count as "not yet" instead of ending the poll
    pub swallow_errors: bool,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            swallow_errors: true,
        }
    }

    /// Any probe error ends the poll immediately.
    pub fn fail_fast(mut self) -> Self {
        self.swallow_errors = false;
        self
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    Done(T),
    Pending,
}

#[derive(Debug)]
pub enum PollError<E> {
    /// Every attempt ran without the probe reporting `Done`
    Exhausted { attempts: u32, last_error: Option<E> },
    /// A probe error with `swallow_errors` off
    Failed { attempt: u32, error: E },
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for PollError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Exhausted {
                attempts,
                last_error: Some(e),
            } => write!(f, "gave up after {} attempts (last error: {})", attempts, e),
            PollError::Exhausted { attempts, .. } => {
                write!(f, "gave up after {} attempts", attempts)
            }
            PollError::Failed { attempt, error } => {
                write!(f, "attempt {} failed: {}", attempt, error)
            }
            PollError::Cancelled => f.write_str("polling cancelled"),
        }
    }
}

/// Run `probe` until it reports `Done`, the attempt cap is reached, or `cancel` fires.
///
/// `probe` receives the 1-based attempt number. The interval sleep only happens
/// between attempts, never after the last one.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollStep<T>, E>>,
    E: fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            step = probe(attempt) => step,
        };

        match step {
            Ok(PollStep::Done(value)) => return Ok(value),
            Ok(PollStep::Pending) => {}
            Err(error) if policy.swallow_errors => {
                tracing::debug!(attempt, error = %error, "poll attempt failed");
                last_error = Some(error);
            }
            Err(error) => return Err(PollError::Failed { attempt, error }),
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
