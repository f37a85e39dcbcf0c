// SQLite Transaction Implementation

use crate::payroll_store::{insert_audit_log, map_sqlx_error};
use async_trait::async_trait;
use paydesk_core::domain::{AuditEntry, EmployeePayrollLine, PayrollStatus, PayrollTotals};
use paydesk_core::error::Result;
use paydesk_core::port::{PayrollTransaction, TimeProvider, Transaction};
use sqlx::{Sqlite, Transaction as SqlxTransaction};
use std::sync::Arc;

pub struct SqlitePayrollTransaction<'a> {
    tx: SqlxTransaction<'a, Sqlite>,
    time_provider: Arc<dyn TimeProvider>,
}

impl<'a> SqlitePayrollTransaction<'a> {
    pub fn new(tx: SqlxTransaction<'a, Sqlite>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self { tx, time_provider }
    }
}

#[async_trait]
impl Transaction for SqlitePayrollTransaction<'_> {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl PayrollTransaction for SqlitePayrollTransaction<'_> {
    async fn update_payroll_totals(
        &mut self,
        payroll_id: &str,
        totals: PayrollTotals,
        expected: PayrollStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payrolls
            SET total_gross = ?, total_net = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(totals.gross.cents())
        .bind(totals.net.cents())
        .bind(self.time_provider.now_millis())
        .bind(payroll_id)
        .bind(expected.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn replace_employee_payroll_lines(
        &mut self,
        payroll_id: &str,
        lines: &[EmployeePayrollLine],
    ) -> Result<()> {
        sqlx::query("DELETE FROM employee_payroll_lines WHERE payroll_id = ?")
            .bind(payroll_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO employee_payroll_lines (
                    id, payroll_id, employee_id, pay_type,
                    regular_hours_worked, gross_pay, net_pay
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&line.id)
            .bind(&line.payroll_id)
            .bind(&line.employee_id)
            .bind(line.pay_type.as_str())
            .bind(line.regular_hours_worked)
            .bind(line.gross_pay.cents())
            .bind(line.net_pay.cents())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        Ok(())
    }

    async fn append_audit_log(&mut self, entry: &AuditEntry) -> Result<()> {
        insert_audit_log(&mut *self.tx, entry).await
    }
}
