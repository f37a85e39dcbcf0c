// Payroll - generation job and producer-side service

pub mod calculation;
mod generate;

pub use generate::{GeneratePayrollHandler, GenerationOutcome};

use crate::domain::queue::PAYROLL_QUEUE;
use crate::domain::{
    validate_transition, AuditAction, AuditEntry, GeneratePayrollJob, Payroll, PayrollStatus,
};
use crate::error::{AppError, Result};
use crate::port::{publish_json, IdProvider, JobPublisher, PayrollStore, PublishOptions, TimeProvider};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Producer-side payroll operations
pub struct PayrollService {
    store: Arc<dyn PayrollStore>,
    publisher: Arc<dyn JobPublisher>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl PayrollService {
    pub fn new(
        store: Arc<dyn PayrollStore>,
        publisher: Arc<dyn JobPublisher>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            publisher,
            id_provider,
            time_provider,
        }
    }

    /// Queue generation for a freshly created DRAFT payroll.
    ///
    /// When the job cannot be queued the payroll is moved to ERROR so it
    /// does not sit in DRAFT forever, and `AppError::Queue` is returned.
    pub async fn request_generation(&self, payroll: &Payroll, requested_by: &str) -> Result<()> {
        if payroll.status != PayrollStatus::Draft {
            return Err(AppError::Validation(format!(
                "generation requires a DRAFT payroll, {} is {}",
                payroll.id, payroll.status
            )));
        }

        let job = GeneratePayrollJob {
            payroll_id: payroll.id.clone(),
            company_id: payroll.company_id.clone(),
            period_start: payroll.period_start,
            period_end: payroll.period_end,
            generated_by_id: requested_by.to_string(),
            retry_count: None,
        };

        let reason = match publish_json(
            self.publisher.as_ref(),
            PAYROLL_QUEUE,
            &job,
            PublishOptions::default(),
        )
        .await
        {
            Ok(true) => {
                info!(payroll_id = %payroll.id, "Payroll generation queued");
                return Ok(());
            }
            Ok(false) => "broker refused the message".to_string(),
            Err(e) => e.to_string(),
        };

        warn!(payroll_id = %payroll.id, reason = %reason, "Could not queue payroll generation");
        self.mark_queue_failed(payroll, requested_by, &reason).await;
        Err(AppError::Queue(format!(
            "payroll {} could not be queued: {}",
            payroll.id, reason
        )))
    }

    /// DRAFT -> ERROR plus an audit entry. Store failures are logged; the
    /// caller already gets the queueing error.
    async fn mark_queue_failed(&self, payroll: &Payroll, actor: &str, reason: &str) {
        match self
            .store
            .update_payroll_status(&payroll.id, PayrollStatus::Draft, PayrollStatus::Error)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(payroll_id = %payroll.id, "Payroll left DRAFT before it could be marked ERROR");
                return;
            }
            Err(e) => {
                error!(payroll_id = %payroll.id, error = %e, "Failed to mark payroll ERROR");
                return;
            }
        }

        let entry = AuditEntry::payroll(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            &payroll.company_id,
            actor,
            AuditAction::PayrollQueueFailed,
            &payroll.id,
            json!({ "reason": reason }),
        );
        if let Err(e) = self.store.append_audit_log(&entry).await {
            error!(payroll_id = %payroll.id, error = %e, "Failed to write audit entry");
        }
    }

    pub async fn approve(&self, payroll_id: &str, actor: &str) -> Result<Payroll> {
        self.transition(payroll_id, actor, PayrollStatus::Approved, AuditAction::PayrollApproved)
            .await
    }

    pub async fn pay(&self, payroll_id: &str, actor: &str) -> Result<Payroll> {
        self.transition(payroll_id, actor, PayrollStatus::Paid, AuditAction::PayrollPaid)
            .await
    }

    async fn transition(
        &self,
        payroll_id: &str,
        actor: &str,
        target: PayrollStatus,
        action: AuditAction,
    ) -> Result<Payroll> {
        let mut payroll = self
            .store
            .find_payroll_by_id(payroll_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payroll {}", payroll_id)))?;

        let from = payroll.status;
        validate_transition(from, target)?;
        if from == target {
            return Ok(payroll);
        }

        if !self
            .store
            .update_payroll_status(payroll_id, from, target)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "payroll {} changed status concurrently",
                payroll_id
            )));
        }

        let entry = AuditEntry::payroll(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            &payroll.company_id,
            actor,
            action,
            payroll_id,
            json!({ "from": from, "to": target }),
        );
        self.store.append_audit_log(&entry).await?;

        info!(payroll_id = %payroll_id, from = %from, to = %target, "Payroll status changed");
        payroll.status = target;
        Ok(payroll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainError;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::payroll_store::mocks::InMemoryPayrollStore;
    use crate::port::publisher::mocks::{PublishBehavior, RecordingPublisher};
    use crate::port::time_provider::FixedTimeProvider;
    use chrono::{TimeZone, Utc};

    fn draft(id: &str) -> Payroll {
        Payroll::new_draft(
            id,
            "C1",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
            0,
        )
    }

    fn service(
        store: &InMemoryPayrollStore,
        publisher: Arc<RecordingPublisher>,
    ) -> PayrollService {
        PayrollService::new(
            Arc::new(store.clone()),
            publisher,
            Arc::new(SequentialIdProvider::new("audit")),
            Arc::new(FixedTimeProvider(1_000)),
        )
    }

    #[tokio::test]
    async fn test_request_generation_publishes_job() {
        let store = InMemoryPayrollStore::new();
        store.insert_payroll(draft("P1"));
        let publisher = Arc::new(RecordingPublisher::accepting());

        service(&store, Arc::clone(&publisher))
            .request_generation(&draft("P1"), "U1")
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, PAYROLL_QUEUE);
        assert_eq!(published[0].1["payrollId"], "P1");
        assert_eq!(published[0].1["generatedById"], "U1");
        assert_eq!(store.payroll("P1").unwrap().status, PayrollStatus::Draft);
    }

    #[tokio::test]
    async fn test_publish_failure_marks_error() {
        for behavior in [PublishBehavior::Refuse, PublishBehavior::Disconnected] {
            let store = InMemoryPayrollStore::new();
            store.insert_payroll(draft("P1"));
            let publisher = Arc::new(RecordingPublisher::new(behavior));

            let result = service(&store, publisher)
                .request_generation(&draft("P1"), "U1")
                .await;

            assert!(matches!(result, Err(AppError::Queue(_))));
            assert_eq!(store.payroll("P1").unwrap().status, PayrollStatus::Error);
            let audit = store.audit_entries();
            assert_eq!(audit.len(), 1);
            assert_eq!(audit[0].action, AuditAction::PayrollQueueFailed);
        }
    }

    #[tokio::test]
    async fn test_approve_then_pay() {
        let store = InMemoryPayrollStore::new();
        store.insert_payroll(draft("P1"));
        let svc = service(&store, Arc::new(RecordingPublisher::accepting()));

        assert_eq!(svc.approve("P1", "U1").await.unwrap().status, PayrollStatus::Approved);
        // same-state request is a no-op
        svc.approve("P1", "U1").await.unwrap();
        assert_eq!(svc.pay("P1", "U1").await.unwrap().status, PayrollStatus::Paid);

        let actions: Vec<AuditAction> = store.audit_entries().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::PayrollApproved, AuditAction::PayrollPaid]
        );
    }

    #[tokio::test]
    async fn test_pay_from_draft_is_rejected() {
        let store = InMemoryPayrollStore::new();
        store.insert_payroll(draft("P1"));
        let svc = service(&store, Arc::new(RecordingPublisher::accepting()));

        let err = svc.pay("P1", "U1").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidStateTransition {
                from: PayrollStatus::Draft,
                to: PayrollStatus::Paid
            })
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_payroll() {
        let store = InMemoryPayrollStore::new();
        let svc = service(&store, Arc::new(RecordingPublisher::accepting()));
        assert!(matches!(
            svc.approve("nope", "U1").await,
            Err(AppError::NotFound(_))
        ));
    }
}
