// Pay calculation (pure)

use crate::domain::{Employee, EmployeePayrollLine, Money, PayType};
use std::collections::HashMap;
use tracing::warn;

/// Gross pay for one employee. Net equals gross: there is no deduction
/// engine yet.
pub fn gross_pay(employee: &Employee, hours: f64) -> Money {
    match employee.pay_type {
        PayType::Salary => employee.salary.unwrap_or_else(|| {
            warn!(employee_id = %employee.id, "Salaried employee has no salary, paying 0");
            Money::ZERO
        }),
        PayType::Hourly => match employee.pay_rate {
            Some(rate) => rate.times_hours(hours),
            None => {
                warn!(employee_id = %employee.id, "Hourly employee has no pay rate, paying 0");
                Money::ZERO
            }
        },
    }
}

/// Compute the full line set for `payroll_id`.
///
/// Hours are taken from the payroll's existing lines; an hourly employee
/// without recorded hours is paid for 0 hours.
pub fn compute_lines(
    payroll_id: &str,
    employees: &[Employee],
    existing: &[EmployeePayrollLine],
) -> Vec<EmployeePayrollLine> {
    let recorded_hours: HashMap<&str, Option<f64>> = existing
        .iter()
        .map(|line| (line.employee_id.as_str(), line.regular_hours_worked))
        .collect();

    employees
        .iter()
        .map(|employee| {
            let recorded = recorded_hours
                .get(employee.id.as_str())
                .copied()
                .flatten();

            let hours = match (employee.pay_type, recorded) {
                (PayType::Hourly, None) => {
                    warn!(
                        payroll_id = %payroll_id,
                        employee_id = %employee.id,
                        "No hours recorded for hourly employee, using 0"
                    );
                    Some(0.0)
                }
                (_, recorded) => recorded,
            };

            let gross = gross_pay(employee, hours.unwrap_or(0.0));
            EmployeePayrollLine {
                id: EmployeePayrollLine::line_id(payroll_id, &employee.id),
                payroll_id: payroll_id.to_string(),
                employee_id: employee.id.clone(),
                pay_type: employee.pay_type,
                regular_hours_worked: hours,
                gross_pay: gross,
                net_pay: gross,
            }
        })
        .collect()
}
