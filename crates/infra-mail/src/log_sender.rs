// Log-only sender, used when no SMTP host is configured

use crate::compose;
use async_trait::async_trait;
use paydesk_core::port::{EmailError, EmailSender};
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct LogEmailSender;

impl LogEmailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        name: Option<&str>,
    ) -> Result<(), EmailError> {
        let email = compose::verification(token, name);
        info!(%to, subject = %email.subject, "Email (log only)");
        Ok(())
    }

    async fn send_invitation_email(
        &self,
        company_name: &str,
        to: &str,
        url: &str,
    ) -> Result<(), EmailError> {
        let email = compose::invitation(company_name, url);
        info!(%to, subject = %email.subject, "Email (log only)");
        Ok(())
    }

    async fn send_welcome_email(
        &self,
        to: &str,
        name: Option<&str>,
        company_name: Option<&str>,
    ) -> Result<(), EmailError> {
        let email = compose::welcome(name, company_name);
        info!(%to, subject = %email.subject, "Email (log only)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        let sender = LogEmailSender::new();
        assert_ok!(sender.send_verification_email("a@example.com", "t", None).await);
        assert_ok!(sender.send_invitation_email("Acme", "b@example.com", "u").await);
        assert_ok!(sender.send_welcome_email("c@example.com", None, None).await);
    }
}
