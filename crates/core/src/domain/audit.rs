// Audit Log Entries

use super::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PayrollGenerated,
    PayrollApproved,
    PayrollPaid,
    PayrollQueueFailed,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::PayrollGenerated => "PAYROLL_GENERATED",
            AuditAction::PayrollApproved => "PAYROLL_APPROVED",
            AuditAction::PayrollPaid => "PAYROLL_PAID",
            AuditAction::PayrollQueueFailed => "PAYROLL_QUEUE_FAILED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PAYROLL_GENERATED" => Ok(AuditAction::PayrollGenerated),
            "PAYROLL_APPROVED" => Ok(AuditAction::PayrollApproved),
            "PAYROLL_PAID" => Ok(AuditAction::PayrollPaid),
            "PAYROLL_QUEUE_FAILED" => Ok(AuditAction::PayrollQueueFailed),
            other => Err(DomainError::ValidationError(format!(
                "unknown audit action: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub company_id: String,
    pub actor_id: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub created_at: i64, // epoch ms
}

impl AuditEntry {
    /// Audit entry about a payroll row
    pub fn payroll(
        id: impl Into<String>,
        created_at: i64,
        company_id: impl Into<String>,
        actor_id: impl Into<String>,
        action: AuditAction,
        payroll_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            company_id: company_id.into(),
            actor_id: actor_id.into(),
            action,
            entity_type: "Payroll".to_string(),
            entity_id: payroll_id.into(),
            details,
            created_at,
        }
    }
}
