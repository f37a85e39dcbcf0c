// Email Sender Port
//
// Template rendering lives behind this interface; the email job only needs
// to know whether a send succeeded.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Message build failed: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        name: Option<&str>,
    ) -> Result<(), EmailError>;

    async fn send_invitation_email(
        &self,
        company_name: &str,
        to: &str,
        url: &str,
    ) -> Result<(), EmailError>;

    async fn send_welcome_email(
        &self,
        to: &str,
        name: Option<&str>,
        company_name: Option<&str>,
    ) -> Result<(), EmailError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentEmail {
        pub kind: &'static str,
        pub to: String,
    }

    /// Records sends; can be told to fail
    #[derive(Default)]
    pub struct RecordingEmailSender {
        fail: Mutex<bool>,
        sent: Mutex<Vec<SentEmail>>,
        attempts: Mutex<usize>,
    }

    impl RecordingEmailSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let sender = Self::default();
            sender.set_failing(true);
            sender
        }

        pub fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        pub fn sent(&self) -> Vec<SentEmail> {
            self.sent.lock().unwrap().clone()
        }

        /// Successful and failed calls
        pub fn attempts(&self) -> usize {
            *self.attempts.lock().unwrap()
        }

        fn record(&self, kind: &'static str, to: &str) -> Result<(), EmailError> {
            *self.attempts.lock().unwrap() += 1;
            if *self.fail.lock().unwrap() {
                return Err(EmailError::Transport("421 service not available".to_string()));
            }
            self.sent.lock().unwrap().push(SentEmail {
                kind,
                to: to.to_string(),
            });
            Ok(())
        }
    }

    #[async_trait]
    impl EmailSender for RecordingEmailSender {
        async fn send_verification_email(
            &self,
            to: &str,
            _token: &str,
            _name: Option<&str>,
        ) -> Result<(), EmailError> {
            self.record("verification", to)
        }

        async fn send_invitation_email(
            &self,
            _company_name: &str,
            to: &str,
            _url: &str,
        ) -> Result<(), EmailError> {
            self.record("invite", to)
        }

        async fn send_welcome_email(
            &self,
            to: &str,
            _name: Option<&str>,
            _company_name: Option<&str>,
        ) -> Result<(), EmailError> {
            self.record("welcome", to)
        }
    }
}
