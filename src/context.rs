use crate::outcome_log::OutcomeLog;
use crate::types::AttemptOutcome;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// Pacer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    /// Between two attempts for the same recipient.
    Backoff,
    /// Between two consecutive batches.
    Batch,
}

impl fmt::Display for PauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backoff => write!(f, "backoff"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// Performs the blocking waits of a run.
///
/// Returns `false` if the wait was cut short by cancellation.
#[allow(async_fn_in_trait)]
pub trait Pacer: Send + Sync {
    async fn pause(
        &self,
        kind: PauseKind,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> bool;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

impl Pacer for TokioPacer {
    async fn pause(
        &self,
        kind: PauseKind,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        tracing::debug!(kind = %kind, ?duration, "Pausing");
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

// ============================================================================
// RunContext
// ============================================================================

/// Everything a single dispatch run shares: the outcome log, the pacer and
/// the cancellation token. Build one per run.
pub struct RunContext<L, P> {
    run_id: Uuid,
    log: L,
    pacer: P,
    cancel: CancellationToken,
    log_failures: AtomicUsize,
}

impl<L: OutcomeLog, P: Pacer> RunContext<L, P> {
    pub fn new(log: L, pacer: P) -> Self {
        Self::with_cancellation(log, pacer, CancellationToken::new())
    }

    pub fn with_cancellation(log: L, pacer: P, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            log,
            pacer,
            cancel,
            log_failures: AtomicUsize::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append the outcome to the log.
    ///
    /// Returns `false` if the append failed; the failure is counted and the
    /// run carries on.
    pub(crate) async fn record(&self, outcome: &AttemptOutcome) -> bool {
        match self.log.append(outcome).await {
            Ok(()) => true,
            Err(e) => {
                self.log_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    recipient = %outcome.recipient,
                    status = %outcome.status,
                    error = %format!("{:#}", e),
                    "Failed to append outcome to log"
                );
                false
            }
        }
    }

    pub fn log_failures(&self) -> usize {
        self.log_failures.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Test utilities: RecordingPacer
// ============================================================================
