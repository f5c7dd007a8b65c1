//! Batch dispatch: the orchestrator of a run.
//!
//! Recipients are split into consecutive batches. Inside a batch each
//! recipient is composed, sent through the retry unit, and its terminal
//! outcome recorded before the batch is considered done. A fixed pause
//! separates consecutive batches; there is none after the last one.

use crate::composer::{Composer, recipient_mailbox};
use crate::config::DeliveryConfig;
use crate::context::{Pacer, PauseKind, RunContext};
use crate::error::DispatchError;
use crate::outcome_log::OutcomeLog;
use crate::retry::{RetryPolicy, send_with_retry};
use crate::transport::Transport;
use crate::types::{AttemptOutcome, Recipient, RunSummary};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    batch_size: usize,
    batch_pause: Duration,
    retry: RetryPolicy,
    concurrency: usize,
}

impl DispatchSettings {
    pub fn new(
        batch_size: usize,
        batch_pause: Duration,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(DispatchError::Config("batch size must be at least 1".into()).into());
        }
        if concurrency == 0 {
            return Err(DispatchError::Config("concurrency must be at least 1".into()).into());
        }
        Ok(Self {
            batch_size,
            batch_pause,
            retry,
            concurrency,
        })
    }

    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        Self::new(
            config.batch_size,
            config.batch_pause(),
            config.retry_policy(),
            config.concurrency,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    Dispatching(usize),
    Pausing(usize),
    Done,
}

/// Phase tracking for one `Dispatcher::run` call. Counts live in the
/// `RunSummary` being built.
struct BatchRunState {
    phase: DispatchPhase,
}

impl BatchRunState {
    fn new() -> Self {
        Self {
            phase: DispatchPhase::Idle,
        }
    }

    fn enter(&mut self, next: DispatchPhase) {
        debug!(from = ?self.phase, to = ?next, "Dispatch phase change");
        self.phase = next;
    }
}

/// Consecutive slices of at most `batch_size` recipients.
pub fn plan_batches(recipients: &[Recipient], batch_size: usize) -> Vec<&[Recipient]> {
    recipients.chunks(batch_size.max(1)).collect()
}

pub struct Dispatcher<T> {
    composer: Composer,
    transport: T,
    settings: DispatchSettings,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(composer: Composer, transport: T, settings: DispatchSettings) -> Self {
        Self {
            composer,
            transport,
            settings,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Dispatch every recipient. Recipient-level failures end up in the
    /// summary and the outcome log; this never returns an error.
    pub async fn run<L, P>(&self, ctx: &RunContext<L, P>, recipients: &[Recipient]) -> RunSummary
    where
        L: OutcomeLog,
        P: Pacer,
    {
        let span = info_span!(
            "dispatch",
            run_id = %ctx.run_id(),
            recipients = recipients.len(),
            batch_size = self.settings.batch_size
        );
        self.run_batches(ctx, recipients).instrument(span).await
    }

    async fn run_batches<L, P>(&self, ctx: &RunContext<L, P>, recipients: &[Recipient]) -> RunSummary
    where
        L: OutcomeLog,
        P: Pacer,
    {
        let batches = plan_batches(recipients, self.settings.batch_size);
        let total = batches.len();
        let mut summary = RunSummary::default();
        let mut state = BatchRunState::new();

        for (index, batch) in batches.into_iter().enumerate() {
            if ctx.is_cancelled() {
                summary
                    .not_attempted
                    .extend(batch.iter().map(|r| r.address().to_string()));
                continue;
            }

            state.enter(DispatchPhase::Dispatching(index));
            let outcomes = self
                .dispatch_batch(ctx, batch)
                .instrument(info_span!("batch", number = index + 1, of = total))
                .await;
            summary.batches += 1;

            for (recipient, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Some(outcome) => summary.push(outcome),
                    None => summary.not_attempted.push(recipient.address().to_string()),
                }
            }
            info!(
                batch = index + 1,
                of = total,
                sent = summary.sent,
                failed = summary.failed,
                "Batch complete"
            );

            if index + 1 < total {
                state.enter(DispatchPhase::Pausing(index));
                let completed = ctx
                    .pacer()
                    .pause(PauseKind::Batch, self.settings.batch_pause, ctx.cancel_token())
                    .await;
                if !completed {
                    warn!(batch = index + 1, "Run cancelled during batch pause");
                }
            }
        }

        state.enter(DispatchPhase::Done);
        summary.cancelled = ctx.is_cancelled();
        summary.log_failures = ctx.log_failures();
        info!(
            sent = summary.sent,
            failed = summary.failed,
            not_attempted = summary.not_attempted.len(),
            cancelled = summary.cancelled,
            "Dispatch finished"
        );
        summary
    }

    /// Outcomes come back in batch order; `None` marks a recipient that was
    /// never started because the run was cancelled.
    async fn dispatch_batch<L, P>(
        &self,
        ctx: &RunContext<L, P>,
        batch: &[Recipient],
    ) -> Vec<Option<AttemptOutcome>>
    where
        L: OutcomeLog,
        P: Pacer,
    {
        info!(size = batch.len(), "Sending batch");
        stream::iter(batch)
            .map(|recipient| self.dispatch_one(ctx, recipient))
            .buffered(self.settings.concurrency)
            .collect()
            .await
    }

    async fn dispatch_one<L, P>(
        &self,
        ctx: &RunContext<L, P>,
        recipient: &Recipient,
    ) -> Option<AttemptOutcome>
    where
        L: OutcomeLog,
        P: Pacer,
    {
        if ctx.is_cancelled() {
            return None;
        }

        let address = recipient.address();
        let outcome = match validate_address(address) {
            Err(e) => AttemptOutcome::failed(address, 0, e.to_string()),
            Ok(()) => {
                send_with_retry(
                    address,
                    &self.settings.retry,
                    ctx.pacer(),
                    ctx.cancel_token(),
                    |_| async move {
                        let message = self.composer.compose(recipient).await?;
                        self.transport.send(&message).await
                    },
                )
                .await
            }
        };

        if outcome.is_sent() {
            info!(recipient = %address, attempts = outcome.attempts, "Email sent");
        } else {
            error!(
                recipient = %address,
                attempts = outcome.attempts,
                error = outcome.last_error.as_deref().unwrap_or_default(),
                "Email failed"
            );
        }

        ctx.record(&outcome).await;
        Some(outcome)
    }
}

/// Malformed addresses are terminal without touching the transport. Uses the
/// same parser as the message header so nothing rejected later gets retried.
fn validate_address(address: &str) -> Result<(), DispatchError> {
    recipient_mailbox(address).map(|_| ())
}
