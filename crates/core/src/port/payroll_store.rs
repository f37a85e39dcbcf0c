// Payroll Store Port (Interface)
//
// Narrow CRUD contract over the relational store. Only the calls the job
// engine and the payroll service need.

use super::transaction::Transaction;
use crate::domain::{AuditEntry, Employee, EmployeePayrollLine, Payroll, PayrollStatus, PayrollTotals};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PayrollStore: Send + Sync {
    async fn find_payroll_by_id(&self, id: &str) -> Result<Option<Payroll>>;

    /// Employees with `is_active` set and `is_deleted` unset
    async fn find_active_employees_by_company(&self, company_id: &str) -> Result<Vec<Employee>>;

    async fn find_employee_payroll_lines(&self, payroll_id: &str) -> Result<Vec<EmployeePayrollLine>>;

    /// Conditional status update; returns false if the row is no longer in `from`
    async fn update_payroll_status(
        &self,
        id: &str,
        from: PayrollStatus,
        to: PayrollStatus,
    ) -> Result<bool>;

    async fn append_audit_log(&self, entry: &AuditEntry) -> Result<()>;

    async fn begin_transaction(&self) -> Result<Box<dyn PayrollTransaction>>;
}

/// Store operations within one transaction
#[async_trait]
pub trait PayrollTransaction: Transaction {
    /// Write totals only while the payroll is still in `expected`.
    /// Returns false when the row has already advanced.
    async fn update_payroll_totals(
        &mut self,
        payroll_id: &str,
        totals: PayrollTotals,
        expected: PayrollStatus,
    ) -> Result<bool>;

    /// Delete every line of the payroll and insert `lines`
    async fn replace_employee_payroll_lines(
        &mut self,
        payroll_id: &str,
        lines: &[EmployeePayrollLine],
    ) -> Result<()>;

    async fn append_audit_log(&mut self, entry: &AuditEntry) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct State {
        payrolls: HashMap<String, Payroll>,
        employees: Vec<Employee>,
        lines: HashMap<String, Vec<EmployeePayrollLine>>,
        audit: Vec<AuditEntry>,
        writes: usize,
        fail_commits: bool,
        advance_on_begin: Option<PayrollStatus>,
    }

    enum Op {
        Totals(String, PayrollTotals),
        Lines(String, Vec<EmployeePayrollLine>),
        Audit(AuditEntry),
    }

    /// Transactional in-memory store; counts committed writes
    #[derive(Clone, Default)]
    pub struct InMemoryPayrollStore {
        state: Arc<Mutex<State>>,
    }

    impl InMemoryPayrollStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert_payroll(&self, payroll: Payroll) {
            self.state
                .lock()
                .unwrap()
                .payrolls
                .insert(payroll.id.clone(), payroll);
        }

        pub fn insert_employee(&self, employee: Employee) {
            self.state.lock().unwrap().employees.push(employee);
        }

        pub fn insert_line(&self, line: EmployeePayrollLine) {
            self.state
                .lock()
                .unwrap()
                .lines
                .entry(line.payroll_id.clone())
                .or_default()
                .push(line);
        }

        pub fn payroll(&self, id: &str) -> Option<Payroll> {
            self.state.lock().unwrap().payrolls.get(id).cloned()
        }

        pub fn lines(&self, payroll_id: &str) -> Vec<EmployeePayrollLine> {
            self.state
                .lock()
                .unwrap()
                .lines
                .get(payroll_id)
                .cloned()
                .unwrap_or_default()
        }

        pub fn audit_entries(&self) -> Vec<AuditEntry> {
            self.state.lock().unwrap().audit.clone()
        }

        /// Committed mutations (status updates, totals, line sets, audit entries)
        pub fn write_count(&self) -> usize {
            self.state.lock().unwrap().writes
        }

        pub fn fail_commits(&self, fail: bool) {
            self.state.lock().unwrap().fail_commits = fail;
        }

        /// Simulate another actor moving every payroll to `status` as soon
        /// as a transaction begins
        pub fn advance_status_on_begin(&self, status: Option<PayrollStatus>) {
            self.state.lock().unwrap().advance_on_begin = status;
        }
    }

    #[async_trait]
    impl PayrollStore for InMemoryPayrollStore {
        async fn find_payroll_by_id(&self, id: &str) -> Result<Option<Payroll>> {
            Ok(self.payroll(id))
        }

        async fn find_active_employees_by_company(
            &self,
            company_id: &str,
        ) -> Result<Vec<Employee>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .employees
                .iter()
                .filter(|e| e.company_id == company_id && e.is_eligible())
                .cloned()
                .collect())
        }

        async fn find_employee_payroll_lines(
            &self,
            payroll_id: &str,
        ) -> Result<Vec<EmployeePayrollLine>> {
            Ok(self.lines(payroll_id))
        }

        async fn update_payroll_status(
            &self,
            id: &str,
            from: PayrollStatus,
            to: PayrollStatus,
        ) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            let updated = match state.payrolls.get_mut(id) {
                Some(payroll) if payroll.status == from => {
                    payroll.status = to;
                    true
                }
                _ => false,
            };
            if updated {
                state.writes += 1;
            }
            Ok(updated)
        }

        async fn append_audit_log(&self, entry: &AuditEntry) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.audit.push(entry.clone());
            state.writes += 1;
            Ok(())
        }

        async fn begin_transaction(&self) -> Result<Box<dyn PayrollTransaction>> {
            let mut state = self.state.lock().unwrap();
            if let Some(status) = state.advance_on_begin {
                for payroll in state.payrolls.values_mut() {
                    payroll.status = status;
                }
            }
            Ok(Box::new(MemoryPayrollTransaction {
                state: Arc::clone(&self.state),
                ops: Vec::new(),
            }))
        }
    }

    struct MemoryPayrollTransaction {
        state: Arc<Mutex<State>>,
        ops: Vec<Op>,
    }

    #[async_trait]
    impl Transaction for MemoryPayrollTransaction {
        async fn commit(self: Box<Self>) -> Result<()> {
            let MemoryPayrollTransaction { state, ops } = *self;
            let mut state = state.lock().unwrap();
            if state.fail_commits {
                return Err(AppError::Database("database is locked".to_string()));
            }
            for op in ops {
                state.writes += 1;
                match op {
                    Op::Totals(id, totals) => {
                        if let Some(payroll) = state.payrolls.get_mut(&id) {
                            payroll.total_gross = totals.gross;
                            payroll.total_net = totals.net;
                        }
                    }
                    Op::Lines(id, lines) => {
                        state.lines.insert(id, lines);
                    }
                    Op::Audit(entry) => state.audit.push(entry),
                }
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl PayrollTransaction for MemoryPayrollTransaction {
        async fn update_payroll_totals(
            &mut self,
            payroll_id: &str,
            totals: PayrollTotals,
            expected: PayrollStatus,
        ) -> Result<bool> {
            let matches = self
                .state
                .lock()
                .unwrap()
                .payrolls
                .get(payroll_id)
                .map(|p| p.status == expected)
                .unwrap_or(false);
            if matches {
                self.ops.push(Op::Totals(payroll_id.to_string(), totals));
            }
            Ok(matches)
        }

        async fn replace_employee_payroll_lines(
            &mut self,
            payroll_id: &str,
            lines: &[EmployeePayrollLine],
        ) -> Result<()> {
            self.ops
                .push(Op::Lines(payroll_id.to_string(), lines.to_vec()));
            Ok(())
        }

        async fn append_audit_log(&mut self, entry: &AuditEntry) -> Result<()> {
            self.ops.push(Op::Audit(entry.clone()));
            Ok(())
        }
    }
}
