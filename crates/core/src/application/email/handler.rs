// Email dispatch job handler

use crate::application::retry::{BackoffPolicy, RetryDecision};
use crate::application::worker::constants::{
    EMAIL_RETRY_BASE_DELAY, EMAIL_RETRY_MAX_DELAY, MAX_EMAIL_RETRIES,
};
use crate::application::worker::{HandlerOutcome, JobHandler};
use crate::domain::queue::EMAIL_RETRY_QUEUE;
use crate::domain::EmailJob;
use crate::port::{publish_json, EmailError, EmailSender, JobPublisher, PublishOptions};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Sends one email per job. A failed send is retried by republishing the
/// job to the retry queue with `retryCount + 1`; the message's expiration
/// is the backoff delay, after which the retry queue dead-letters it back
/// to the email queue.
///
/// All delays share one retry queue and RabbitMQ only expires messages at
/// the head of a queue, so a short retry queued behind a longer one waits
/// for it: a retry never runs early, but may run late by up to the longest
/// delay ahead of it (`EMAIL_RETRY_MAX_DELAY`).
pub struct EmailDispatchHandler {
    sender: Arc<dyn EmailSender>,
    publisher: Arc<dyn JobPublisher>,
    backoff: BackoffPolicy,
    max_retries: u32,
}

impl EmailDispatchHandler {
    pub fn new(sender: Arc<dyn EmailSender>, publisher: Arc<dyn JobPublisher>) -> Self {
        Self {
            sender,
            publisher,
            backoff: BackoffPolicy::new(EMAIL_RETRY_BASE_DELAY, EMAIL_RETRY_MAX_DELAY, Duration::ZERO),
            max_retries: MAX_EMAIL_RETRIES,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    async fn send(&self, job: &EmailJob) -> Result<(), EmailError> {
        match job {
            EmailJob::Verification {
                to, token, name, ..
            } => {
                self.sender
                    .send_verification_email(to, token, name.as_deref())
                    .await
            }
            EmailJob::Invite {
                to,
                company_name,
                invitation_url,
                ..
            } => {
                self.sender
                    .send_invitation_email(company_name, to, invitation_url)
                    .await
            }
            EmailJob::Welcome {
                to,
                name,
                company_name,
                ..
            } => {
                self.sender
                    .send_welcome_email(to, name.as_deref(), company_name.as_deref())
                    .await
            }
        }
    }

    async fn schedule_retry(&self, job: EmailJob, cause: EmailError) -> HandlerOutcome {
        let kind = job.kind();
        let retry_count = job.retry_count();

        let (next_count, delay) = match self.backoff.decide(retry_count, self.max_retries) {
            RetryDecision::Retry { next_count, delay } => (next_count, delay),
            RetryDecision::Exhausted => {
                error!(kind = kind, retries = retry_count, error = %cause, "Email delivery gave up");
                return HandlerOutcome::PermanentFailure(format!(
                    "email delivery failed after {} retries: {}",
                    retry_count, cause
                ));
            }
        };

        let next = job.with_retry_count(next_count);
        let options = PublishOptions::expiring_after(delay.as_millis() as u64);
        match publish_json(self.publisher.as_ref(), EMAIL_RETRY_QUEUE, &next, options).await {
            Ok(true) => {
                info!(
                    kind = kind,
                    retry_count = next_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %cause,
                    "Email send failed, retry scheduled"
                );
                HandlerOutcome::Success
            }
            Ok(false) => HandlerOutcome::TransientFailure(format!(
                "email send failed ({}) and retry was not accepted",
                cause
            )),
            Err(e) => HandlerOutcome::TransientFailure(format!(
                "email send failed ({}) and retry could not be queued: {}",
                cause, e
            )),
        }
    }
}

#[async_trait]
impl JobHandler for EmailDispatchHandler {
    type Job = EmailJob;

    fn name(&self) -> &'static str {
        "email-dispatch"
    }

    async fn handle(&self, job: EmailJob) -> HandlerOutcome {
        if let Err(e) = job.validate() {
            warn!(kind = job.kind(), error = %e, "Invalid email job");
            return HandlerOutcome::PermanentFailure(e.to_string());
        }

        match self.send(&job).await {
            Ok(()) => {
                info!(kind = job.kind(), "Email sent");
                HandlerOutcome::Success
            }
            Err(e) => self.schedule_retry(job, e).await,
        }
    }
}
