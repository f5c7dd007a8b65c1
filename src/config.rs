//! Delivery configuration loaded once before a run.
//!
//! The file is JSON with PascalCase keys. Only the SMTP password may be
//! overridden from the environment (`SMTP_PASSWORD`) so it can stay out of
//! the file.

use crate::error::DispatchError;
use crate::retry::{MAX_ATTEMPTS_CAP, RetryPolicy};
use anyhow::Result;
use email_address::EmailAddress;
use lettre::message::Mailbox;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PASSWORD_ENV: &str = "SMTP_PASSWORD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS.
    #[default]
    Starttls,
    /// TLS from the first byte (SMTPS).
    Wrapper,
    /// No encryption. Local relays and test sinks only.
    None,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeliveryConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
    pub sender_email: String,
    pub subject: String,
    pub html_template: PathBuf,
    #[serde(default)]
    pub embedded_images: Vec<PathBuf>,
    pub batch_size: usize,

    #[serde(default)]
    pub tls: TlsMode,
    #[serde(default = "default_attachments_dir")]
    pub attachments_dir: PathBuf,
    #[serde(default = "default_success_log")]
    pub success_log: PathBuf,
    #[serde(default = "default_failure_log")]
    pub failure_log: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_batch_pause_secs")]
    pub batch_pause_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_attachments_dir() -> PathBuf {
    PathBuf::from("attachments")
}

fn default_success_log() -> PathBuf {
    PathBuf::from("log.txt")
}

fn default_failure_log() -> PathBuf {
    PathBuf::from("failed_emails.txt")
}

fn default_max_attempts() -> u32 {
    MAX_ATTEMPTS_CAP
}

fn default_retry_backoff_secs() -> u64 {
    2
}

fn default_batch_pause_secs() -> u64 {
    3
}

fn default_concurrency() -> usize {
    1
}

fn invalid(msg: String) -> Result<()> {
    Err(DispatchError::Config(msg).into())
}

impl DeliveryConfig {
    /// Read, override from the environment and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&raw)?
            .with_env_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config = serde_json::from_str(raw)
            .map_err(|e| DispatchError::Config(format!("cannot parse configuration: {}", e)))?;
        Ok(config)
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.smtp_password = password;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.smtp_server.trim().is_empty() {
            return invalid("SmtpServer must not be empty".to_string());
        }
        if self.batch_size == 0 {
            return invalid("BatchSize must be at least 1".to_string());
        }
        if self.concurrency == 0 {
            return invalid("Concurrency must be at least 1".to_string());
        }
        if !(1..=MAX_ATTEMPTS_CAP).contains(&self.max_attempts) {
            return invalid(format!(
                "MaxAttempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_CAP, self.max_attempts
            ));
        }
        let sender = self.sender_email.trim();
        if !EmailAddress::is_valid(sender) || sender.parse::<Mailbox>().is_err() {
            return invalid(format!("SenderEmail {:?} is not a valid address", self.sender_email));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.retry_backoff_secs))
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_secs(self.batch_pause_secs)
    }
}

impl fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"<redacted>")
            .field("sender_email", &self.sender_email)
            .field("subject", &self.subject)
            .field("html_template", &self.html_template)
            .field("embedded_images", &self.embedded_images)
            .field("batch_size", &self.batch_size)
            .field("tls", &self.tls)
            .field("attachments_dir", &self.attachments_dir)
            .field("max_attempts", &self.max_attempts)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "SmtpServer": "smtp.example.com",
        "SmtpPort": 587,
        "SmtpUsername": "mailer",
        "SmtpPassword": "hunter2",
        "SenderEmail": "news@example.com",
        "Subject": "Hello",
        "HtmlTemplate": "template.html",
        "EmbeddedImages": ["images/logo.png"],
        "BatchSize": 50
    }"#;

    fn config_error(err: anyhow::Error) -> String {
        match err.downcast_ref::<DispatchError>() {
            Some(DispatchError::Config(msg)) => msg.clone(),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn parses_pascal_case_keys_and_applies_defaults() {
        let config = DeliveryConfig::from_json(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.smtp_server, "smtp.example.com");
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.embedded_images, vec![PathBuf::from("images/logo.png")]);
        assert_eq!(config.tls, TlsMode::Starttls);
        assert_eq!(config.attachments_dir, PathBuf::from("attachments"));
        assert_eq!(config.success_log, PathBuf::from("log.txt"));
        assert_eq!(config.failure_log, PathBuf::from("failed_emails.txt"));
        assert_eq!(config.concurrency, 1);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(), Duration::from_secs(2));
        assert_eq!(config.batch_pause(), Duration::from_secs(3));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let raw = MINIMAL.replace("\"BatchSize\": 50", "\"BatchSize\": 0");
        let config = DeliveryConfig::from_json(&raw).unwrap();
        let msg = config_error(config.validate().unwrap_err());
        assert!(msg.contains("BatchSize"));
    }

    #[test]
    fn max_attempts_above_cap_is_rejected() {
        let raw = MINIMAL.replace("\"BatchSize\": 50", "\"BatchSize\": 50, \"MaxAttempts\": 5");
        let config = DeliveryConfig::from_json(&raw).unwrap();
        let msg = config_error(config.validate().unwrap_err());
        assert!(msg.contains("MaxAttempts"));
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let raw = MINIMAL.replace("news@example.com", "not-an-address");
        let config = DeliveryConfig::from_json(&raw).unwrap();
        let msg = config_error(config.validate().unwrap_err());
        assert!(msg.contains("SenderEmail"));
    }

    #[test]
    fn sender_must_be_usable_in_a_from_header() {
        let raw = MINIMAL.replace("news@example.com", r#"\"a b\"@example.com"#);
        let config = DeliveryConfig::from_json(&raw).unwrap();
        let msg = config_error(config.validate().unwrap_err());
        assert!(msg.contains("SenderEmail"));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = DeliveryConfig::from_json("{ not json").unwrap_err();
        assert!(config_error(err).contains("cannot parse"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = DeliveryConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(config_error(err).contains("cannot read"));
    }

    #[test]
    fn password_can_come_from_environment() {
        let config = DeliveryConfig::from_json(MINIMAL)
            .unwrap()
            .with_env_overrides(|key| (key == PASSWORD_ENV).then(|| "from-env".to_string()));
        assert_eq!(config.smtp_password, "from-env");
    }

    #[test]
    fn debug_output_hides_password() {
        let config = DeliveryConfig::from_json(MINIMAL).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn tls_mode_parses_lowercase() {
        let raw = MINIMAL.replace("\"BatchSize\": 50", "\"BatchSize\": 50, \"Tls\": \"wrapper\"");
        let config = DeliveryConfig::from_json(&raw).unwrap();
        assert_eq!(config.tls, TlsMode::Wrapper);
    }
}
