// Email - dispatch job and producer-side service

mod handler;

pub use handler::EmailDispatchHandler;

use crate::domain::queue::EMAIL_QUEUE;
use crate::domain::EmailJob;
use crate::error::{AppError, Result};
use crate::port::{publish_json, JobPublisher, PublishOptions};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EmailService {
    publisher: Arc<dyn JobPublisher>,
}

impl EmailService {
    pub fn new(publisher: Arc<dyn JobPublisher>) -> Self {
        Self { publisher }
    }

    /// Validate and queue an email job
    pub async fn enqueue(&self, job: &EmailJob) -> Result<()> {
        job.validate()?;

        match publish_json(self.publisher.as_ref(), EMAIL_QUEUE, job, PublishOptions::default())
            .await
        {
            Ok(true) => {
                debug!(kind = job.kind(), "Email job queued");
                Ok(())
            }
            Ok(false) => {
                warn!(kind = job.kind(), "Email job refused by broker");
                Err(AppError::Queue(format!(
                    "{} email could not be queued",
                    job.kind()
                )))
            }
            Err(e) => {
                warn!(kind = job.kind(), error = %e, "Email job could not be queued");
                Err(AppError::Queue(format!(
                    "{} email could not be queued: {}",
                    job.kind(),
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::publisher::mocks::{PublishBehavior, RecordingPublisher};

    fn welcome(to: &str) -> EmailJob {
        EmailJob::Welcome {
            to: to.into(),
            name: Some("Alice".into()),
            company_name: Some("Acme".into()),
            retry_count: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_publishes_to_email_queue() {
        let publisher = Arc::new(RecordingPublisher::accepting());
        let service = EmailService::new(publisher.clone());

        service.enqueue(&welcome("alice@example.com")).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, EMAIL_QUEUE);
        assert_eq!(published[0].1["type"], "welcome");
        assert_eq!(published[0].1["companyName"], "Acme");
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_job() {
        let publisher = Arc::new(RecordingPublisher::accepting());
        let service = EmailService::new(publisher.clone());

        let result = service.enqueue(&welcome("")).await;
        assert!(matches!(result, Err(AppError::Domain(_))));
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_is_queue_error() {
        let publisher = Arc::new(RecordingPublisher::new(PublishBehavior::Refuse));
        let service = EmailService::new(publisher.clone());
        assert!(matches!(
            service.enqueue(&welcome("a@example.com")).await,
            Err(AppError::Queue(_))
        ));

        publisher.set_behavior(PublishBehavior::Disconnected);
        assert!(matches!(
            service.enqueue(&welcome("a@example.com")).await,
            Err(AppError::Queue(_))
        ));
    }
}
