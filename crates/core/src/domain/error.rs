// Domain Error Types

use super::status::PayrollStatus;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid payroll status transition: {from} -> {to}")]
    InvalidStateTransition {
        from: PayrollStatus,
        to: PayrollStatus,
    },

    #[error("Unknown payroll status: {0}")]
    UnknownStatus(String),

    #[error("Unknown pay type: {0}")]
    UnknownPayType(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
