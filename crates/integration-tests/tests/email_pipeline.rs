//! Email dispatch end to end through the broker engine and the in-memory broker

use std::sync::Arc;
use std::time::Duration;

use paydesk_core::application::{Broker, BrokerConfig, EmailDispatchHandler, EmailService};
use paydesk_core::domain::queue::{EMAIL_DEAD_LETTER_QUEUE, EMAIL_QUEUE, EMAIL_RETRY_QUEUE};
use paydesk_core::domain::{EmailJob, QueueTopology};
use paydesk_core::error::AppError;
use paydesk_core::port::broker::mocks::InMemoryBroker;
use paydesk_core::port::email_sender::mocks::RecordingEmailSender;
use paydesk_core::port::JobPublisher;
use tokio_test::assert_ok;

struct Harness {
    mock: InMemoryBroker,
    broker: Broker,
    sender: Arc<RecordingEmailSender>,
    service: EmailService,
}

async fn setup(sender: RecordingEmailSender) -> Harness {
    let mock = InMemoryBroker::new();
    let config = BrokerConfig {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        reconnect_jitter: Duration::ZERO,
        ..BrokerConfig::new("amqp://test")
    };
    let broker = Broker::new(config, Arc::new(mock.clone()));
    broker.initialize().await.unwrap();
    broker
        .setup_queue_with_dlx(&QueueTopology::email_dispatch())
        .await
        .unwrap();

    let sender = Arc::new(sender);
    let publisher: Arc<dyn JobPublisher> = Arc::new(broker.clone());
    let handler = Arc::new(EmailDispatchHandler::new(sender.clone(), publisher.clone()));
    broker.consume(EMAIL_QUEUE, handler, 5).await.unwrap();

    Harness {
        mock,
        broker,
        sender,
        service: EmailService::new(publisher),
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

fn welcome(retry_count: Option<u32>) -> EmailJob {
    EmailJob::Welcome {
        to: "alice@example.com".to_string(),
        name: Some("Alice".to_string()),
        company_name: Some("Acme".to_string()),
        retry_count,
    }
}

#[tokio::test]
async fn test_enqueued_email_is_sent_and_acked() {
    let h = setup(RecordingEmailSender::new()).await;

    assert_ok!(h.service.enqueue(&welcome(None)).await);
    eventually("email acked", || h.mock.acked(EMAIL_QUEUE) == 1).await;

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "welcome");
    assert_eq!(sent[0].to, "alice@example.com");

    h.broker.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_never_reaches_sender() {
    let h = setup(RecordingEmailSender::new()).await;

    h.mock.inject(EMAIL_QUEUE, b"{not json".to_vec());
    eventually("payload dead-lettered", || {
        h.mock.dead_lettered(EMAIL_QUEUE).len() == 1
    })
    .await;

    assert_eq!(h.sender.attempts(), 0);
    assert_eq!(h.mock.queue_depth(EMAIL_DEAD_LETTER_QUEUE), 1);

    h.broker.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_email_type_is_dead_lettered() {
    let h = setup(RecordingEmailSender::new()).await;

    h.mock.inject(
        EMAIL_QUEUE,
        br#"{"type":"newsletter","to":"a@example.com"}"#.to_vec(),
    );
    eventually("payload dead-lettered", || {
        h.mock.dead_lettered(EMAIL_QUEUE).len() == 1
    })
    .await;
    assert_eq!(h.sender.attempts(), 0);

    h.broker.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_recipient_is_rejected_by_producer() {
    let h = setup(RecordingEmailSender::new()).await;

    let job = EmailJob::Verification {
        to: "not-an-address".to_string(),
        token: "123456".to_string(),
        name: None,
        retry_count: None,
    };
    let result = h.service.enqueue(&job).await;
    assert!(matches!(result, Err(AppError::Domain(_))));
    assert!(h.mock.published(EMAIL_QUEUE).is_empty());

    h.broker.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_send_schedules_delayed_retry() {
    let h = setup(RecordingEmailSender::failing()).await;

    h.service.enqueue(&welcome(None)).await.unwrap();
    eventually("retry published", || {
        !h.mock.published(EMAIL_RETRY_QUEUE).is_empty()
    })
    .await;
    eventually("original acked", || h.mock.acked(EMAIL_QUEUE) == 1).await;

    let retries = h.mock.published(EMAIL_RETRY_QUEUE);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].json()["retryCount"], 1);
    assert_eq!(retries[0].json()["type"], "welcome");
    assert_eq!(retries[0].options.expiration_ms, Some(5_000));
    assert!(h.mock.dead_lettered(EMAIL_QUEUE).is_empty());

    h.broker.close().await.unwrap();
}

#[tokio::test]
async fn test_expired_retry_is_redelivered_and_sent() {
    let h = setup(RecordingEmailSender::failing()).await;

    h.service.enqueue(&welcome(None)).await.unwrap();
    eventually("retry waiting", || h.mock.queue_depth(EMAIL_RETRY_QUEUE) == 1).await;
    eventually("original acked", || h.mock.acked(EMAIL_QUEUE) == 1).await;
    assert!(h.sender.sent().is_empty());

    // SMTP recovers before the retry delay elapses
    h.sender.set_failing(false);
    assert_eq!(h.mock.expire(EMAIL_RETRY_QUEUE), 1);

    eventually("retry acked", || h.mock.acked(EMAIL_QUEUE) == 2).await;
    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "welcome");
    assert_eq!(h.sender.attempts(), 2);
    assert_eq!(h.mock.queue_depth(EMAIL_RETRY_QUEUE), 0);
    assert_eq!(h.mock.published(EMAIL_RETRY_QUEUE).len(), 1);
    assert!(h.mock.dead_lettered(EMAIL_QUEUE).is_empty());

    h.broker.close().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_are_dead_lettered() {
    let h = setup(RecordingEmailSender::failing()).await;

    let bytes = serde_json::to_vec(&welcome(Some(5))).unwrap();
    h.mock.inject(EMAIL_QUEUE, bytes);
    eventually("job dead-lettered", || {
        h.mock.dead_lettered(EMAIL_QUEUE).len() == 1
    })
    .await;

    assert_eq!(h.sender.attempts(), 1);
    assert!(h.mock.published(EMAIL_RETRY_QUEUE).is_empty());

    h.broker.close().await.unwrap();
}
