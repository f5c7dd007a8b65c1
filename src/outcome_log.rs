//! Append-only record of terminal per-recipient outcomes.
//!
//! Successes and failures go to separate files, one line per recipient,
//! written as soon as the recipient reaches its terminal outcome.

use crate::types::{AttemptOutcome, DeliveryStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// OutcomeLog trait
// ============================================================================

/// Implementations must make each `append` a single atomic record so that
/// concurrent workers never interleave lines.
#[allow(async_fn_in_trait)]
pub trait OutcomeLog: Send + Sync {
    async fn append(&self, outcome: &AttemptOutcome) -> Result<()>;
}

// ============================================================================
// FileOutcomeLog
// ============================================================================

pub struct FileOutcomeLog {
    success_path: PathBuf,
    failure_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileOutcomeLog {
    pub fn new(success_path: impl Into<PathBuf>, failure_path: impl Into<PathBuf>) -> Self {
        Self {
            success_path: success_path.into(),
            failure_path: failure_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, status: DeliveryStatus) -> &Path {
        match status {
            DeliveryStatus::Sent => &self.success_path,
            DeliveryStatus::FailedAfterRetries => &self.failure_path,
        }
    }
}

impl OutcomeLog for FileOutcomeLog {
    async fn append(&self, outcome: &AttemptOutcome) -> Result<()> {
        let path = self.path_for(outcome.status);
        let line = format_line(outcome, Local::now());

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open outcome log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to outcome log {}", path.display()))?;
        file.flush().await?;

        Ok(())
    }
}

pub(crate) fn format_line(outcome: &AttemptOutcome, at: DateTime<Local>) -> String {
    let timestamp = at.format(TIMESTAMP_FORMAT);
    match outcome.status {
        DeliveryStatus::Sent => format!(
            "{}: Successfully sent email to {}\n",
            timestamp,
            single_line(&outcome.recipient)
        ),
        DeliveryStatus::FailedAfterRetries => format!(
            "{}: Failed to send email to {}. Error: {}\n",
            timestamp,
            single_line(&outcome.recipient),
            single_line(outcome.last_error.as_deref().unwrap_or("unknown error"))
        ),
    }
}

/// Relay replies can span several lines; a record must not.
fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Test utilities: MemoryOutcomeLog
// ============================================================================
