use crate::composer::ComposedMessage;
use crate::config::{DeliveryConfig, TlsMode};
use crate::error::DispatchError;
use anyhow::Result;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::debug;

// ============================================================================
// Transport trait
// ============================================================================

/// Hands one fully-formed message to a mail relay.
///
/// Implementations are shared read-only for the whole run and may be called
/// from several workers at once, but never concurrently for one recipient.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &ComposedMessage) -> Result<()>;
}

// ============================================================================
// SmtpTransport
// ============================================================================

pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// Connections are opened lazily on first send.
    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        let host = config.smtp_server.trim();
        let builder = match config.tls {
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| DispatchError::Config(format!("SMTP relay {}: {}", host, e)))?,
            TlsMode::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| DispatchError::Config(format!("SMTP relay {}: {}", host, e)))?,
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        let mut builder = builder.port(config.smtp_port);
        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            inner: builder.build(),
        })
    }
}

impl Transport for SmtpTransport {
    async fn send(&self, message: &ComposedMessage) -> Result<()> {
        let email = message.to_message()?;
        let response = self
            .inner
            .send(email)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        debug!(
            recipient = %message.to,
            code = %response.code(),
            "Relay accepted message"
        );
        Ok(())
    }
}

// ============================================================================
// Test utilities: ScriptedTransport
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    fn config(tls: &str, port: u16) -> DeliveryConfig {
        DeliveryConfig::from_json(&format!(
            r#"{{
                "SmtpServer": "127.0.0.1",
                "SmtpPort": {port},
                "SmtpUsername": "",
                "SenderEmail": "news@example.com",
                "Subject": "Hello",
                "HtmlTemplate": "template.html",
                "BatchSize": 1,
                "Tls": "{tls}"
            }}"#
        ))
        .unwrap()
    }

    fn message() -> ComposedMessage {
        ComposedMessage {
            from: "news@example.com".into(),
            to: "ana@example.com".into(),
            subject: "Hello".into(),
            html_body: "<p>Hi</p>".into(),
            inline_images: Vec::new(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn builds_for_every_tls_mode() {
        for tls in ["starttls", "wrapper", "none"] {
            assert!(SmtpTransport::from_config(&config(tls, 2525)).is_ok(), "{}", tls);
        }
    }

    #[tokio::test]
    async fn unreachable_relay_is_transport_error() {
        // Port 1 on loopback refuses connections.
        let transport = SmtpTransport::from_config(&config("none", 1)).unwrap();
        let err = transport.send(&message()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn scripted_transport_fails_then_delivers() {
        let transport = test_utils::ScriptedTransport::new().failing_times("ana@example.com", 1);
        assert!(transport.send(&message()).await.is_err());
        assert!(transport.send(&message()).await.is_ok());
        assert_eq!(transport.attempts_for("ana@example.com"), 2);
        assert_eq!(transport.delivered_to(), vec!["ana@example.com"]);
    }
}
