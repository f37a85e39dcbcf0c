// SQLite PayrollStore Implementation

use crate::transaction::SqlitePayrollTransaction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paydesk_core::domain::{
    AuditEntry, Employee, EmployeePayrollLine, Money, Payroll, PayrollStatus,
};
use paydesk_core::error::{AppError, Result};
use paydesk_core::port::{PayrollStore, PayrollTransaction, TimeProvider};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::debug;

/// Convert sqlx errors to AppError with SQLite-specific handling
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "787" | "3850" => AppError::Database(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    // SQLITE_BUSY and its extended codes
                    "5" | "261" | "517" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

/// Insert one audit row through any executor (pool or open transaction)
pub(crate) async fn insert_audit_log<'e, E>(executor: E, entry: &AuditEntry) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let details = serde_json::to_string(&entry.details)?;

    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            id, company_id, actor_id, action, entity_type, entity_id, details, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.company_id)
    .bind(&entry.actor_id)
    .bind(entry.action.as_str())
    .bind(&entry.entity_type)
    .bind(&entry.entity_id)
    .bind(details)
    .bind(entry.created_at)
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

pub struct SqlitePayrollStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqlitePayrollStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new payroll row (producer side; the job engine never creates payrolls)
    pub async fn insert_payroll(&self, payroll: &Payroll) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payrolls (
                id, company_id, status, period_start, period_end,
                total_gross, total_net, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&payroll.id)
        .bind(&payroll.company_id)
        .bind(payroll.status.as_str())
        .bind(payroll.period_start)
        .bind(payroll.period_end)
        .bind(payroll.total_gross.cents())
        .bind(payroll.total_net.cents())
        .bind(payroll.created_at)
        .bind(payroll.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    pub async fn insert_employee(&self, employee: &Employee) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO employees (
                id, company_id, name, pay_type, salary, pay_rate, is_active, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&employee.id)
        .bind(&employee.company_id)
        .bind(&employee.name)
        .bind(employee.pay_type.as_str())
        .bind(employee.salary.map(Money::cents))
        .bind(employee.pay_rate.map(Money::cents))
        .bind(employee.is_active)
        .bind(employee.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    /// Record a line ahead of generation, e.g. timesheet hours for an hourly employee
    pub async fn insert_payroll_line(&self, line: &EmployeePayrollLine) -> Result<()> {
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
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    /// Audit trail of one entity, oldest first
    pub async fn find_audit_logs(&self, entity_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT * FROM audit_logs WHERE entity_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(AuditRow::into_entry).collect()
    }
}

#[async_trait]
impl PayrollStore for SqlitePayrollStore {
    async fn find_payroll_by_id(&self, id: &str) -> Result<Option<Payroll>> {
        let row = sqlx::query_as::<_, PayrollRow>("SELECT * FROM payrolls WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(PayrollRow::into_payroll).transpose()
    }

    async fn find_active_employees_by_company(&self, company_id: &str) -> Result<Vec<Employee>> {
        let rows = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT * FROM employees
            WHERE company_id = ? AND is_active = 1 AND is_deleted = 0
            ORDER BY id ASC
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(EmployeeRow::into_employee).collect()
    }

    async fn find_employee_payroll_lines(
        &self,
        payroll_id: &str,
    ) -> Result<Vec<EmployeePayrollLine>> {
        let rows = sqlx::query_as::<_, LineRow>(
            "SELECT * FROM employee_payroll_lines WHERE payroll_id = ? ORDER BY employee_id ASC",
        )
        .bind(payroll_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(LineRow::into_line).collect()
    }

    async fn update_payroll_status(
        &self,
        id: &str,
        from: PayrollStatus,
        to: PayrollStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE payrolls SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(self.time_provider.now_millis())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let updated = result.rows_affected() == 1;
        debug!(payroll_id = %id, %from, %to, updated, "Payroll status update");
        Ok(updated)
    }

    async fn append_audit_log(&self, entry: &AuditEntry) -> Result<()> {
        insert_audit_log(&self.pool, entry).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn PayrollTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqlitePayrollTransaction::new(
            tx,
            Arc::clone(&self.time_provider),
        )))
    }
}

// ============================================================================
// Row mappings
// ============================================================================

#[derive(FromRow)]
struct PayrollRow {
    id: String,
    company_id: String,
    status: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    total_gross: i64,
    total_net: i64,
    created_at: i64,
    updated_at: i64,
}

impl PayrollRow {
    fn into_payroll(self) -> Result<Payroll> {
        Ok(Payroll {
            status: self.status.parse()?,
            id: self.id,
            company_id: self.company_id,
            period_start: self.period_start,
            period_end: self.period_end,
            total_gross: Money::from_cents(self.total_gross),
            total_net: Money::from_cents(self.total_net),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct EmployeeRow {
    id: String,
    company_id: String,
    name: String,
    pay_type: String,
    salary: Option<i64>,
    pay_rate: Option<i64>,
    is_active: bool,
    is_deleted: bool,
}

impl EmployeeRow {
    fn into_employee(self) -> Result<Employee> {
        Ok(Employee {
            pay_type: self.pay_type.parse()?,
            id: self.id,
            company_id: self.company_id,
            name: self.name,
            salary: self.salary.map(Money::from_cents),
            pay_rate: self.pay_rate.map(Money::from_cents),
            is_active: self.is_active,
            is_deleted: self.is_deleted,
        })
    }
}

#[derive(FromRow)]
struct LineRow {
    id: String,
    payroll_id: String,
    employee_id: String,
    pay_type: String,
    regular_hours_worked: Option<f64>,
    gross_pay: i64,
    net_pay: i64,
}

impl LineRow {
    fn into_line(self) -> Result<EmployeePayrollLine> {
        Ok(EmployeePayrollLine {
            pay_type: self.pay_type.parse()?,
            id: self.id,
            payroll_id: self.payroll_id,
            employee_id: self.employee_id,
            regular_hours_worked: self.regular_hours_worked,
            gross_pay: Money::from_cents(self.gross_pay),
            net_pay: Money::from_cents(self.net_pay),
        })
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: String,
    company_id: String,
    actor_id: String,
    action: String,
    entity_type: String,
    entity_id: String,
    details: String,
    created_at: i64,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditEntry> {
        Ok(AuditEntry {
            action: self.action.parse()?,
            details: serde_json::from_str(&self.details)?,
            id: self.id,
            company_id: self.company_id,
            actor_id: self.actor_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            created_at: self.created_at,
        })
    }
}
