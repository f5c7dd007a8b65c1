//! Bounded, strictly sequential retry of one recipient's delivery.
//!
//! Every error is retryable up to the cap. The wait between attempts is a
//! fixed backoff performed by the run's `Pacer`, never after the last attempt.

use crate::context::{Pacer, PauseKind};
use crate::types::AttemptOutcome;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hard upper bound on attempts per recipient.
pub const MAX_ATTEMPTS_CAP: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to `1..=MAX_ATTEMPTS_CAP`.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CAP),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS_CAP, Duration::from_secs(2))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting(u32),
    Waiting { attempts: u32, last_error: String },
    Succeeded(u32),
    Exhausted { attempts: u32, last_error: String },
}

impl RetryState {
    /// Transition out of `Attempting(n)` given that attempt's result.
    pub fn after_attempt(attempts: u32, result: Result<(), String>, policy: &RetryPolicy) -> Self {
        match result {
            Ok(()) => Self::Succeeded(attempts),
            Err(last_error) if attempts >= policy.max_attempts => Self::Exhausted {
                attempts,
                last_error,
            },
            Err(last_error) => Self::Waiting {
                attempts,
                last_error,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Exhausted { .. })
    }
}

/// Drive `attempt` until it succeeds, the policy is exhausted, or the run is
/// cancelled during a backoff wait.
///
/// `attempt` receives the 1-based attempt number and must do the whole
/// build-and-send for that attempt.
pub async fn send_with_retry<P, F, Fut>(
    recipient: &str,
    policy: &RetryPolicy,
    pacer: &P,
    cancel: &CancellationToken,
    mut attempt: F,
) -> AttemptOutcome
where
    P: Pacer,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut state = RetryState::Idle;
    loop {
        state = match state {
            RetryState::Idle => RetryState::Attempting(1),
            RetryState::Attempting(n) => {
                let result = attempt(n).await.map_err(|e| format!("{:#}", e));
                if let Err(e) = &result {
                    warn!(
                        recipient = recipient,
                        attempt = n,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "Send attempt failed"
                    );
                }
                RetryState::after_attempt(n, result, policy)
            }
            RetryState::Waiting {
                attempts,
                last_error,
            } => {
                debug!(recipient = recipient, backoff = ?policy.backoff, "Backing off");
                if pacer.pause(PauseKind::Backoff, policy.backoff, cancel).await {
                    RetryState::Attempting(attempts + 1)
                } else {
                    return AttemptOutcome::failed(
                        recipient,
                        attempts,
                        format!("cancelled after {} attempt(s): {}", attempts, last_error),
                    );
                }
            }
            RetryState::Succeeded(attempts) => return AttemptOutcome::sent(recipient, attempts),
            RetryState::Exhausted {
                attempts,
                last_error,
            } => return AttemptOutcome::failed(recipient, attempts, last_error),
        };
    }
}
