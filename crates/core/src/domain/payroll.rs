// Payroll Domain Model

use super::error::{DomainError, Result};
use super::money::Money;
use super::status::PayrollStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Financial aggregate mutated by the generation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payroll {
    pub id: String,
    pub company_id: String,
    pub status: PayrollStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_gross: Money,
    pub total_net: Money,
    pub created_at: i64, // epoch ms
    pub updated_at: i64, // epoch ms
}

impl Payroll {
    /// Create a DRAFT payroll with zero totals
    pub fn new_draft(
        id: impl Into<String>,
        company_id: impl Into<String>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            company_id: company_id.into(),
            status: PayrollStatus::Draft,
            period_start,
            period_end,
            total_gross: Money::ZERO,
            total_net: Money::ZERO,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    pub fn totals(&self) -> PayrollTotals {
        PayrollTotals {
            gross: self.total_gross,
            net: self.total_net,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayrollTotals {
    pub gross: Money,
    pub net: Money,
}

impl PayrollTotals {
    pub fn of(lines: &[EmployeePayrollLine]) -> Self {
        Self {
            gross: lines.iter().map(|l| l.gross_pay).sum(),
            net: lines.iter().map(|l| l.net_pay).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayType {
    Salary,
    Hourly,
}

impl PayType {
    pub fn as_str(self) -> &'static str {
        match self {
            PayType::Salary => "SALARY",
            PayType::Hourly => "HOURLY",
        }
    }
}

impl fmt::Display for PayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SALARY" => Ok(PayType::Salary),
            "HOURLY" => Ok(PayType::Hourly),
            other => Err(DomainError::UnknownPayType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub pay_type: PayType,
    /// Salary per pay period (SALARY employees)
    pub salary: Option<Money>,
    /// Hourly rate (HOURLY employees)
    pub pay_rate: Option<Money>,
    pub is_active: bool,
    pub is_deleted: bool,
}

impl Employee {
    pub fn is_eligible(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

/// Per-employee computed pay record, regenerated as a whole on every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeePayrollLine {
    pub id: String,
    pub payroll_id: String,
    pub employee_id: String,
    pub pay_type: PayType,
    pub regular_hours_worked: Option<f64>,
    pub gross_pay: Money,
    pub net_pay: Money,
}

impl EmployeePayrollLine {
    /// Line id derived from its natural key so regeneration is stable
    pub fn line_id(payroll_id: &str, employee_id: &str) -> String {
        format!("{}:{}", payroll_id, employee_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(gross: i64, net: i64) -> EmployeePayrollLine {
        EmployeePayrollLine {
            id: "l".into(),
            payroll_id: "p".into(),
            employee_id: "e".into(),
            pay_type: PayType::Salary,
            regular_hours_worked: None,
            gross_pay: Money::from_cents(gross),
            net_pay: Money::from_cents(net),
        }
    }

    #[test]
    fn test_totals_of_lines() {
        let totals = PayrollTotals::of(&[line(100, 90), line(250, 200)]);
        assert_eq!(totals.gross, Money::from_cents(350));
        assert_eq!(totals.net, Money::from_cents(290));
        assert_eq!(PayrollTotals::of(&[]), PayrollTotals::default());
    }

    #[test]
    fn test_pay_type_parse() {
        assert_eq!("HOURLY".parse::<PayType>(), Ok(PayType::Hourly));
        assert!("WEEKLY".parse::<PayType>().is_err());
    }

    #[test]
    fn test_eligibility() {
        let mut employee = Employee {
            id: "e1".into(),
            company_id: "c1".into(),
            name: "Alice".into(),
            pay_type: PayType::Salary,
            salary: Some(Money::from_cents(300_000)),
            pay_rate: None,
            is_active: true,
            is_deleted: false,
        };
        assert!(employee.is_eligible());
        employee.is_deleted = true;
        assert!(!employee.is_eligible());
    }
}
