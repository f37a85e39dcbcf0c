// Payroll generation job handler
//
// Idempotent: only a DRAFT payroll is (re)computed, and the computed state
// depends only on the payroll and its employees.

use super::calculation;
use crate::application::worker::{HandlerOutcome, JobHandler};
use crate::domain::{
    AuditAction, AuditEntry, EmployeePayrollLine, GeneratePayrollJob, Money, Payroll,
    PayrollStatus, PayrollTotals,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, PayrollStore, PayrollTransaction, TimeProvider};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a generation run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Payroll was past DRAFT on arrival; nothing written
    AlreadyResolved(PayrollStatus),
    /// No eligible employees: totals reset to zero, lines cleared
    NoEligibleEmployees,
    Generated { lines: usize, total_gross: Money },
    /// Another actor resolved the payroll while this run was computing
    ResolvedConcurrently(PayrollStatus),
}

pub struct GeneratePayrollHandler {
    store: Arc<dyn PayrollStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl GeneratePayrollHandler {
    pub fn new(
        store: Arc<dyn PayrollStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            id_provider,
            time_provider,
        }
    }

    pub async fn generate(&self, job: &GeneratePayrollJob) -> Result<GenerationOutcome> {
        let payroll = self
            .store
            .find_payroll_by_id(&job.payroll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payroll {}", job.payroll_id)))?;

        if payroll.company_id != job.company_id {
            return Err(AppError::Validation(format!(
                "payroll {} belongs to company {}, not {}",
                payroll.id, payroll.company_id, job.company_id
            )));
        }

        if payroll.status != PayrollStatus::Draft {
            info!(
                payroll_id = %payroll.id,
                status = %payroll.status,
                "Payroll already resolved, skipping generation"
            );
            return Ok(GenerationOutcome::AlreadyResolved(payroll.status));
        }

        let employees = self
            .store
            .find_active_employees_by_company(&payroll.company_id)
            .await?;
        let existing = self.store.find_employee_payroll_lines(&payroll.id).await?;
        let lines = calculation::compute_lines(&payroll.id, &employees, &existing);
        let totals = PayrollTotals::of(&lines);
        let audit = self.audit_entry(job, &payroll, &lines, totals);

        let mut tx = self.store.begin_transaction().await?;
        let written = write_generation(tx.as_mut(), &payroll.id, totals, &lines, &audit).await;
        match written {
            Ok(true) => tx.commit().await?,
            Ok(false) => {
                tx.rollback().await?;
                return self.recheck(&payroll.id).await;
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(
                        payroll_id = %payroll.id,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                return Err(e);
            }
        }

        info!(
            payroll_id = %payroll.id,
            employees = lines.len(),
            total_gross = %totals.gross,
            total_net = %totals.net,
            "Payroll generated"
        );

        if lines.is_empty() {
            Ok(GenerationOutcome::NoEligibleEmployees)
        } else {
            Ok(GenerationOutcome::Generated {
                lines: lines.len(),
                total_gross: totals.gross,
            })
        }
    }

    /// The guarded totals update matched nothing: find out why
    async fn recheck(&self, payroll_id: &str) -> Result<GenerationOutcome> {
        match self.store.find_payroll_by_id(payroll_id).await? {
            Some(payroll) if payroll.status.is_resolved() => {
                info!(
                    payroll_id = %payroll_id,
                    status = %payroll.status,
                    "Payroll resolved concurrently, discarding computed lines"
                );
                Ok(GenerationOutcome::ResolvedConcurrently(payroll.status))
            }
            Some(_) => Err(AppError::Conflict(format!(
                "payroll {} is DRAFT but its totals could not be updated",
                payroll_id
            ))),
            None => Err(AppError::NotFound(format!("payroll {}", payroll_id))),
        }
    }

    fn audit_entry(
        &self,
        job: &GeneratePayrollJob,
        payroll: &Payroll,
        lines: &[EmployeePayrollLine],
        totals: PayrollTotals,
    ) -> AuditEntry {
        AuditEntry::payroll(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            &payroll.company_id,
            &job.generated_by_id,
            AuditAction::PayrollGenerated,
            &payroll.id,
            json!({
                "employeeCount": lines.len(),
                "totalGross": totals.gross.cents(),
                "totalNet": totals.net.cents(),
                "periodStart": job.period_start,
                "periodEnd": job.period_end,
            }),
        )
    }
}

/// Returns false, having written nothing, when the payroll left DRAFT
async fn write_generation(
    tx: &mut dyn PayrollTransaction,
    payroll_id: &str,
    totals: PayrollTotals,
    lines: &[EmployeePayrollLine],
    audit: &AuditEntry,
) -> Result<bool> {
    if !tx
        .update_payroll_totals(payroll_id, totals, PayrollStatus::Draft)
        .await?
    {
        return Ok(false);
    }
    tx.replace_employee_payroll_lines(payroll_id, lines).await?;
    tx.append_audit_log(audit).await?;
    Ok(true)
}

#[async_trait]
impl JobHandler for GeneratePayrollHandler {
    type Job = GeneratePayrollJob;

    fn name(&self) -> &'static str {
        "payroll-generate"
    }

    async fn handle(&self, job: GeneratePayrollJob) -> HandlerOutcome {
        match self.generate(&job).await {
            Ok(_) => HandlerOutcome::Success,
            Err(e) => {
                warn!(payroll_id = %job.payroll_id, error = %e, "Payroll generation failed");
                HandlerOutcome::from_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Employee, PayType};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::payroll_store::mocks::InMemoryPayrollStore;
    use crate::port::time_provider::FixedTimeProvider;
    use chrono::{TimeZone, Utc};

    fn job(payroll_id: &str, company_id: &str) -> GeneratePayrollJob {
        GeneratePayrollJob {
            payroll_id: payroll_id.into(),
            company_id: company_id.into(),
            period_start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            period_end: Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap(),
            generated_by_id: "U1".into(),
            retry_count: None,
        }
    }

    fn employee(id: &str, pay_type: PayType, cents: i64) -> Employee {
        Employee {
            id: id.into(),
            company_id: "C1".into(),
            name: id.into(),
            pay_type,
            salary: (pay_type == PayType::Salary).then_some(Money::from_cents(cents)),
            pay_rate: (pay_type == PayType::Hourly).then_some(Money::from_cents(cents)),
            is_active: true,
            is_deleted: false,
        }
    }

    fn seeded() -> InMemoryPayrollStore {
        let store = InMemoryPayrollStore::new();
        let j = job("P1", "C1");
        store.insert_payroll(Payroll::new_draft("P1", "C1", j.period_start, j.period_end, 0));
        store.insert_employee(employee("alice", PayType::Salary, 300_000));
        store.insert_employee(employee("bob", PayType::Hourly, 2_000));
        let mut inactive = employee("carl", PayType::Salary, 999_999);
        inactive.is_active = false;
        store.insert_employee(inactive);
        store.insert_line(EmployeePayrollLine {
            id: "P1:bob".into(),
            payroll_id: "P1".into(),
            employee_id: "bob".into(),
            pay_type: PayType::Hourly,
            regular_hours_worked: Some(80.0),
            gross_pay: Money::ZERO,
            net_pay: Money::ZERO,
        });
        store
    }

    fn handler(store: &InMemoryPayrollStore) -> GeneratePayrollHandler {
        GeneratePayrollHandler::new(
            Arc::new(store.clone()),
            Arc::new(SequentialIdProvider::new("audit")),
            Arc::new(FixedTimeProvider(1_700_000_000_000)),
        )
    }

    #[tokio::test]
    async fn test_generates_lines_totals_and_audit() {
        let store = seeded();
        let outcome = handler(&store).generate(&job("P1", "C1")).await.unwrap();

        assert_eq!(
            outcome,
            GenerationOutcome::Generated {
                lines: 2,
                total_gross: Money::from_cents(460_000)
            }
        );
        let payroll = store.payroll("P1").unwrap();
        assert_eq!(payroll.status, PayrollStatus::Draft);
        assert_eq!(payroll.total_gross.to_string(), "4600.00");
        assert_eq!(payroll.total_net.to_string(), "4600.00");

        let lines = store.lines("P1");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.employee_id != "carl"));

        let audit = store.audit_entries();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::PayrollGenerated);
        assert_eq!(audit[0].actor_id, "U1");
        assert_eq!(audit[0].entity_id, "P1");
        assert_eq!(audit[0].details["totalGross"], 460_000);
    }

    #[tokio::test]
    async fn test_second_run_is_identical() {
        let store = seeded();
        let h = handler(&store);
        h.generate(&job("P1", "C1")).await.unwrap();
        let first_lines = store.lines("P1");
        let first_totals = store.payroll("P1").unwrap().totals();

        h.generate(&job("P1", "C1")).await.unwrap();
        assert_eq!(store.lines("P1"), first_lines);
        assert_eq!(store.payroll("P1").unwrap().totals(), first_totals);
    }

    #[tokio::test]
    async fn test_resolved_payroll_is_a_no_op() {
        for status in [
            PayrollStatus::Approved,
            PayrollStatus::Paid,
            PayrollStatus::Error,
            PayrollStatus::Cancelled,
        ] {
            let store = seeded();
            let mut payroll = store.payroll("P1").unwrap();
            payroll.status = status;
            store.insert_payroll(payroll);

            let h = handler(&store);
            let outcome = h.generate(&job("P1", "C1")).await.unwrap();
            assert_eq!(outcome, GenerationOutcome::AlreadyResolved(status));
            assert_eq!(store.write_count(), 0);
            assert_eq!(h.handle(job("P1", "C1")).await, HandlerOutcome::Success);
        }
    }

    #[tokio::test]
    async fn test_no_employees_resets_totals() {
        let store = InMemoryPayrollStore::new();
        let j = job("P2", "C2");
        let mut payroll = Payroll::new_draft("P2", "C2", j.period_start, j.period_end, 0);
        payroll.total_gross = Money::from_cents(100);
        payroll.total_net = Money::from_cents(100);
        store.insert_payroll(payroll);

        let outcome = handler(&store).generate(&j).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::NoEligibleEmployees);
        let payroll = store.payroll("P2").unwrap();
        assert_eq!(payroll.totals(), PayrollTotals::default());
        assert_eq!(payroll.status, PayrollStatus::Draft);
        assert!(store.lines("P2").is_empty());
    }

    #[tokio::test]
    async fn test_missing_payroll_is_permanent() {
        let store = seeded();
        let outcome = handler(&store).handle(job("P404", "C1")).await;
        assert!(matches!(outcome, HandlerOutcome::PermanentFailure(_)));
    }

    #[tokio::test]
    async fn test_company_mismatch_is_permanent() {
        let store = seeded();
        let outcome = handler(&store).handle(job("P1", "C9")).await;
        assert!(matches!(outcome, HandlerOutcome::PermanentFailure(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_approval_wins() {
        let store = seeded();
        store.advance_status_on_begin(Some(PayrollStatus::Approved));

        let outcome = handler(&store).generate(&job("P1", "C1")).await.unwrap();
        assert_eq!(
            outcome,
            GenerationOutcome::ResolvedConcurrently(PayrollStatus::Approved)
        );
        assert!(store.audit_entries().is_empty());
        assert_eq!(store.payroll("P1").unwrap().total_gross, Money::ZERO);
    }

    #[tokio::test]
    async fn test_commit_failure_is_transient() {
        let store = seeded();
        store.fail_commits(true);

        let outcome = handler(&store).handle(job("P1", "C1")).await;
        assert!(matches!(outcome, HandlerOutcome::TransientFailure(_)));
        assert!(store.audit_entries().is_empty());
    }
}
