use serde::Deserialize;
use std::fmt;

/// One row of the recipient list.
///
/// Names are only used for placeholder substitution and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Recipient {
    #[serde(alias = "Email")]
    pub email: String,
    #[serde(alias = "FirstName", default)]
    pub first_name: String,
    #[serde(alias = "LastName", default)]
    pub last_name: String,
}

impl Recipient {
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// The address with surrounding whitespace removed.
    pub fn address(&self) -> &str {
        self.email.trim()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    FailedAfterRetries,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::FailedAfterRetries => write!(f, "failed"),
        }
    }
}

/// Terminal result for a single recipient in a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub recipient: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl AttemptOutcome {
    pub fn sent(recipient: impl Into<String>, attempts: u32) -> Self {
        Self {
            recipient: recipient.into(),
            status: DeliveryStatus::Sent,
            attempts,
            last_error: None,
        }
    }

    pub fn failed(recipient: impl Into<String>, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            status: DeliveryStatus::FailedAfterRetries,
            attempts,
            last_error: Some(error.into()),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}

/// Aggregated result of one `Dispatcher::run` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sent: usize,
    pub failed: usize,
    pub batches: usize,
    /// Outcomes in recipient-list order.
    pub outcomes: Vec<AttemptOutcome>,
    /// `(address, last error)` for every failed recipient.
    pub failures: Vec<(String, String)>,
    /// Recipients never started because the run was cancelled.
    pub not_attempted: Vec<String>,
    /// Outcomes that could not be appended to the outcome log.
    pub log_failures: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.sent + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    pub(crate) fn push(&mut self, outcome: AttemptOutcome) {
        if outcome.is_sent() {
            self.sent += 1;
        } else {
            self.failed += 1;
            self.failures.push((
                outcome.recipient.clone(),
                outcome.last_error.clone().unwrap_or_default(),
            ));
        }
        self.outcomes.push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_trimmed() {
        let r = Recipient::new("  ana@example.com\t", "Ana", "Lee");
        assert_eq!(r.address(), "ana@example.com");
    }

    #[test]
    fn summary_push_tracks_counts_and_failures() {
        let mut summary = RunSummary::default();
        summary.push(AttemptOutcome::sent("a@example.com", 1));
        summary.push(AttemptOutcome::failed("b@example.com", 3, "timeout"));

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 2);
        assert_eq!(
            summary.failures,
            vec![("b@example.com".to_string(), "timeout".to_string())]
        );
        assert!(!summary.is_clean());
    }

    #[test]
    fn recipient_deserializes_from_pascal_case_headers() {
        let json = r#"{"Email":"x@example.com","FirstName":"X","LastName":"Y"}"#;
        let r: Recipient = serde_json::from_str(json).unwrap();
        assert_eq!(r, Recipient::new("x@example.com", "X", "Y"));
    }
}
