// Payroll Status State Machine
//
// Pure validation, no I/O. The adjacency table is the only source of truth
// for user-requested transitions (approve, pay).

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayrollStatus {
    Draft,
    Approved,
    Paid,
    Error,
    Cancelled,
}

impl PayrollStatus {
    pub const ALL: [PayrollStatus; 5] = [
        PayrollStatus::Draft,
        PayrollStatus::Approved,
        PayrollStatus::Paid,
        PayrollStatus::Error,
        PayrollStatus::Cancelled,
    ];

    /// Legal successors of this status
    pub fn successors(self) -> &'static [PayrollStatus] {
        match self {
            PayrollStatus::Draft => &[PayrollStatus::Approved],
            PayrollStatus::Approved => &[PayrollStatus::Paid],
            PayrollStatus::Paid | PayrollStatus::Error | PayrollStatus::Cancelled => &[],
        }
    }

    /// PAID, ERROR and CANCELLED never change again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PayrollStatus::Paid | PayrollStatus::Error | PayrollStatus::Cancelled
        )
    }

    /// Anything past DRAFT: the generation job has nothing left to do
    pub fn is_resolved(self) -> bool {
        self != PayrollStatus::Draft
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayrollStatus::Draft => "DRAFT",
            PayrollStatus::Approved => "APPROVED",
            PayrollStatus::Paid => "PAID",
            PayrollStatus::Error => "ERROR",
            PayrollStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PayrollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayrollStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        PayrollStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

/// Validate a requested status transition.
///
/// Same-state requests are accepted as no-ops. Every edge outside the
/// adjacency table is rejected with an error naming both states.
pub fn validate_transition(current: PayrollStatus, requested: PayrollStatus) -> Result<()> {
    if current == requested || current.successors().contains(&requested) {
        return Ok(());
    }
    Err(DomainError::InvalidStateTransition {
        from: current,
        to: requested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(from: PayrollStatus, to: PayrollStatus) -> bool {
        use PayrollStatus::*;
        matches!((from, to), (Draft, Approved) | (Approved, Paid))
    }

    #[test]
    fn test_every_pair_against_table() {
        for from in PayrollStatus::ALL {
            for to in PayrollStatus::ALL {
                let result = validate_transition(from, to);
                if from == to || allowed(from, to) {
                    assert!(result.is_ok(), "{from} -> {to} should be accepted");
                } else {
                    assert_eq!(
                        result,
                        Err(DomainError::InvalidStateTransition { from, to }),
                        "{from} -> {to} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_error_names_both_states() {
        let err = validate_transition(PayrollStatus::Paid, PayrollStatus::Draft).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("PAID"));
        assert!(msg.contains("DRAFT"));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        for status in PayrollStatus::ALL {
            if status.is_terminal() {
                assert!(status.successors().is_empty());
                assert!(status.is_resolved());
            }
        }
        assert!(!PayrollStatus::Draft.is_resolved());
        assert!(PayrollStatus::Approved.is_resolved());
        assert!(!PayrollStatus::Approved.is_terminal());
    }

    #[test]
    fn test_parse_round_trip_and_unknown() {
        assert_eq!("APPROVED".parse::<PayrollStatus>(), Ok(PayrollStatus::Approved));
        assert_eq!(
            "approved".parse::<PayrollStatus>(),
            Err(DomainError::UnknownStatus("approved".into()))
        );
        assert_eq!(
            serde_json::to_string(&PayrollStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }
}
