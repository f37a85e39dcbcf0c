// SMTP sender over lettre's async transport

use crate::compose::{self, ComposedEmail};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use paydesk_core::port::{EmailError, EmailSender};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    StartTls,
    Tls,
    /// Plain connection; local relays and test servers only
    None,
}

impl TlsMode {
    /// "starttls" (default), "tls" or "none"
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tls" => TlsMode::Tls,
            "none" => TlsMode::None,
            _ => TlsMode::StartTls,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 587,
            username: None,
            password: None,
            from: from.into(),
            tls: TlsMode::StartTls,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct SmtpEmailSender {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn from_config(config: SmtpConfig) -> Result<Self, EmailError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|_| EmailError::InvalidAddress(config.from.clone()))?;

        let mut builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| EmailError::Transport(e.to_string()))?,
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| EmailError::Transport(e.to_string()))?,
        };

        builder = builder.port(config.port).timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: Arc::new(builder.build()),
            from,
        })
    }

    fn build_message(&self, to: &str, email: ComposedEmail) -> Result<Message, EmailError> {
        let to: Mailbox = to
            .parse()
            .map_err(|_| EmailError::InvalidAddress(to.to_string()))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .body(email.body)
            .map_err(|e| EmailError::Build(e.to_string()))
    }

    async fn deliver(&self, to: &str, email: ComposedEmail) -> Result<(), EmailError> {
        let message = self.build_message(to, email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        debug!(%to, "Email delivered to SMTP relay");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        name: Option<&str>,
    ) -> Result<(), EmailError> {
        self.deliver(to, compose::verification(token, name)).await
    }

    async fn send_invitation_email(
        &self,
        company_name: &str,
        to: &str,
        url: &str,
    ) -> Result<(), EmailError> {
        self.deliver(to, compose::invitation(company_name, url)).await
    }

    async fn send_welcome_email(
        &self,
        to: &str,
        name: Option<&str>,
        company_name: Option<&str>,
    ) -> Result<(), EmailError> {
        self.deliver(to, compose::welcome(name, company_name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn local_config() -> SmtpConfig {
        let mut config = SmtpConfig::new("127.0.0.1", "Paydesk <no-reply@paydesk.local>");
        config.tls = TlsMode::None;
        config.port = 2525;
        config
    }

    #[test]
    fn test_tls_mode_parse() {
        assert_eq!(TlsMode::parse("TLS"), TlsMode::Tls);
        assert_eq!(TlsMode::parse("none"), TlsMode::None);
        assert_eq!(TlsMode::parse("anything"), TlsMode::StartTls);
    }

    #[tokio::test]
    async fn test_invalid_from_address_rejected() {
        let mut config = local_config();
        config.from = "not an address".to_string();
        match SmtpEmailSender::from_config(config) {
            Err(EmailError::InvalidAddress(addr)) => assert_eq!(addr, "not an address"),
            _ => panic!("expected InvalidAddress"),
        }
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_recipient() {
        let sender = SmtpEmailSender::from_config(local_config()).unwrap();
        let result = sender.build_message("nobody", compose::welcome(None, None));
        assert!(matches!(result, Err(EmailError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_build_message_sets_headers() {
        let sender = SmtpEmailSender::from_config(local_config()).unwrap();
        let message = sender
            .build_message("alice@example.com", compose::verification("999", Some("Alice")))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: alice@example.com"));
        assert!(raw.contains("Subject: Verify your email address"));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_transport_error() {
        let mut config = local_config();
        // Port 1 is never an SMTP server
        config.port = 1;
        config.timeout = Duration::from_secs(2);
        let sender = SmtpEmailSender::from_config(config).unwrap();
        let result = sender
            .send_welcome_email("bob@example.com", Some("Bob"), None)
            .await;
        assert_err!(&result);
        assert!(matches!(result, Err(EmailError::Transport(_))));
    }
}
