// Job Payloads (wire format: UTF-8 JSON, camelCase)
//
// A job is never stored: its only durable form is the message on the queue.

use super::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Computes gross/net pay for a DRAFT payroll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePayrollJob {
    pub payroll_id: String,
    pub company_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub generated_by_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

/// Transactional email, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailJob {
    #[serde(rename_all = "camelCase")]
    Verification {
        to: String,
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Invite {
        to: String,
        company_name: String,
        invitation_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Welcome {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        company_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
    },
}

impl EmailJob {
    pub fn kind(&self) -> &'static str {
        match self {
            EmailJob::Verification { .. } => "verification",
            EmailJob::Invite { .. } => "invite",
            EmailJob::Welcome { .. } => "welcome",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            EmailJob::Verification { to, .. }
            | EmailJob::Invite { to, .. }
            | EmailJob::Welcome { to, .. } => to,
        }
    }

    pub fn retry_count(&self) -> u32 {
        match self {
            EmailJob::Verification { retry_count, .. }
            | EmailJob::Invite { retry_count, .. }
            | EmailJob::Welcome { retry_count, .. } => retry_count.unwrap_or(0),
        }
    }

    /// Same job carrying a new retry counter
    pub fn with_retry_count(mut self, count: u32) -> Self {
        match &mut self {
            EmailJob::Verification { retry_count, .. }
            | EmailJob::Invite { retry_count, .. }
            | EmailJob::Welcome { retry_count, .. } => *retry_count = Some(count),
        }
        self
    }

    /// Field-level checks beyond the payload shape
    pub fn validate(&self) -> Result<()> {
        let to = self.recipient();
        if to.trim().is_empty() || !to.contains('@') {
            return Err(DomainError::ValidationError(format!(
                "invalid recipient address: {:?}",
                to
            )));
        }
        match self {
            EmailJob::Verification { token, .. } if token.trim().is_empty() => Err(
                DomainError::ValidationError("verification token is empty".to_string()),
            ),
            EmailJob::Invite {
                company_name,
                invitation_url,
                ..
            } => {
                if company_name.trim().is_empty() {
                    return Err(DomainError::ValidationError(
                        "invite company name is empty".to_string(),
                    ));
                }
                if invitation_url.trim().is_empty() {
                    return Err(DomainError::ValidationError(
                        "invitation url is empty".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
