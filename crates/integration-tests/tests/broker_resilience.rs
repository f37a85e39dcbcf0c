//! Connection loss, channel failure and reconnect exhaustion as seen by a
//! running email consumer

use std::sync::Arc;
use std::time::Duration;

use paydesk_core::application::{Broker, BrokerConfig, ConnectionState, EmailDispatchHandler};
use paydesk_core::domain::queue::{
    EMAIL_DEAD_LETTER_EXCHANGE, EMAIL_DEAD_LETTER_QUEUE, EMAIL_QUEUE, EMAIL_RETRY_QUEUE,
};
use paydesk_core::domain::{EmailJob, QueueTopology};
use paydesk_core::port::broker::mocks::InMemoryBroker;
use paydesk_core::port::email_sender::mocks::RecordingEmailSender;
use paydesk_core::port::{BrokerError, JobPublisher, PublishOptions};

fn fast_config(max_attempts: u32) -> BrokerConfig {
    BrokerConfig {
        url: "amqp://test".to_string(),
        max_reconnect_attempts: max_attempts,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        reconnect_jitter: Duration::ZERO,
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

async fn email_worker(max_attempts: u32) -> (InMemoryBroker, Broker, Arc<RecordingEmailSender>) {
    let mock = InMemoryBroker::new();
    let broker = Broker::new(fast_config(max_attempts), Arc::new(mock.clone()));
    broker.initialize().await.unwrap();
    broker
        .setup_queue_with_dlx(&QueueTopology::email_dispatch())
        .await
        .unwrap();

    let sender = Arc::new(RecordingEmailSender::new());
    let publisher: Arc<dyn JobPublisher> = Arc::new(broker.clone());
    let handler = Arc::new(EmailDispatchHandler::new(sender.clone(), publisher));
    broker.consume(EMAIL_QUEUE, handler, 5).await.unwrap();
    (mock, broker, sender)
}

fn welcome_bytes(to: &str) -> Vec<u8> {
    serde_json::to_vec(&EmailJob::Welcome {
        to: to.to_string(),
        name: None,
        company_name: None,
        retry_count: None,
    })
    .unwrap()
}

#[tokio::test]
async fn test_topology_is_declared_once_per_provisioning() {
    let (mock, broker, _sender) = email_worker(3).await;

    assert_eq!(mock.exchange_declarations(EMAIL_DEAD_LETTER_EXCHANGE), 1);
    assert!(mock.is_bound(
        EMAIL_DEAD_LETTER_QUEUE,
        EMAIL_DEAD_LETTER_EXCHANGE,
        "email.send.dead"
    ));
    assert!(mock.queue_spec(EMAIL_RETRY_QUEUE).is_some());
    assert_eq!(mock.prefetch(EMAIL_QUEUE), Some(5));

    // Provisioning the same topology again is a no-op
    broker
        .setup_queue_with_dlx(&QueueTopology::email_dispatch())
        .await
        .unwrap();
    assert_eq!(mock.exchange_declarations(EMAIL_DEAD_LETTER_EXCHANGE), 1);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn test_consumer_survives_connection_loss() {
    let (mock, broker, sender) = email_worker(5).await;

    mock.inject(EMAIL_QUEUE, welcome_bytes("before@example.com"));
    eventually("first email", || sender.sent().len() == 1).await;

    mock.drop_connection();
    eventually("reconnected", || {
        broker.state() == ConnectionState::Connected && mock.connect_calls() == 2
    })
    .await;
    assert_eq!(broker.reconnect_attempts(), 0);
    // Topology provisioned again on the new connection
    assert_eq!(mock.exchange_declarations(EMAIL_DEAD_LETTER_EXCHANGE), 2);

    mock.inject(EMAIL_QUEUE, welcome_bytes("after@example.com"));
    eventually("second email", || sender.sent().len() == 2).await;
    assert_eq!(sender.sent()[1].to, "after@example.com");

    broker.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_after_channel_failure_uses_fresh_channel() {
    let (mock, broker, _sender) = email_worker(3).await;

    assert!(broker
        .publish(EMAIL_RETRY_QUEUE, b"{}", PublishOptions::default())
        .await
        .unwrap());
    mock.fail_channel(EMAIL_RETRY_QUEUE);

    // The first attempt may land on the dead channel and report false
    let mut accepted = false;
    for _ in 0..3 {
        if broker
            .publish(EMAIL_RETRY_QUEUE, b"{}", PublishOptions::default())
            .await
            .unwrap()
        {
            accepted = true;
            break;
        }
    }
    assert!(accepted);
    assert_eq!(mock.published(EMAIL_RETRY_QUEUE).len(), 2);
    assert_eq!(broker.state(), ConnectionState::Connected);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_reconnects_report_failed() {
    let (mock, broker, _sender) = email_worker(2).await;
    let mut state = broker.subscribe_state();

    mock.refuse_all_connects(true);
    mock.drop_connection();

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Failed),
    )
    .await
    .expect("broker should give up")
    .unwrap();

    // Initial connect plus two reconnect attempts
    assert_eq!(mock.connect_calls(), 3);
    let result = broker
        .publish(EMAIL_QUEUE, b"{}", PublishOptions::default())
        .await;
    assert!(matches!(result, Err(BrokerError::NotConnected)));
}
