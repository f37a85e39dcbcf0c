// Consumers: bounded-concurrency dispatch with manual acknowledgement

use super::{Broker, BrokerInner};
use crate::application::worker::constants::{
    ERROR_RECOVERY_SLEEP_DURATION, GRACEFUL_SHUTDOWN_TIMEOUT,
};
use crate::application::worker::{
    execute_guarded_async, DeliveryHandler, HandlerOutcome, JobHandler, JsonDeliveryHandler,
    PanicGuardResult, ShutdownToken,
};
use crate::port::{BrokerConnection, BrokerError, BrokerResult, Delivery, DeliveryStream};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

static CONSUMER_SEQ: AtomicU64 = AtomicU64::new(1);

pub(super) struct ConsumerRegistration {
    queue: String,
    concurrency: u16,
    tag: String,
    handler: Arc<dyn DeliveryHandler>,
    /// One permit per in-flight delivery, shared across reconnects
    permits: Arc<Semaphore>,
}

/// What to tell the broker about a processed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Reject { requeue: bool },
}

/// Acknowledgement policy.
///
/// Transient failures get exactly one requeue: a delivery the broker already
/// redelivered is rejected without requeue so it lands in the DLQ instead
/// of looping.
pub fn settlement(outcome: &HandlerOutcome, redelivered: bool) -> Settlement {
    match outcome {
        HandlerOutcome::Success => Settlement::Ack,
        HandlerOutcome::PermanentFailure(_) => Settlement::Reject { requeue: false },
        HandlerOutcome::TransientFailure(_) => Settlement::Reject {
            requeue: !redelivered,
        },
    }
}

impl Broker {
    /// Consume `queue` with at most `concurrency` unacknowledged deliveries
    /// in flight. The subscription is restored after reconnects.
    pub async fn consume<H: JobHandler>(
        &self,
        queue: &str,
        handler: Arc<H>,
        concurrency: u16,
    ) -> BrokerResult<()> {
        let conn = self.inner.current_connection()?;
        let concurrency = concurrency.max(1);
        let registration = Arc::new(ConsumerRegistration {
            queue: queue.to_string(),
            concurrency,
            tag: format!(
                "{}-{}",
                handler.name(),
                CONSUMER_SEQ.fetch_add(1, Ordering::SeqCst)
            ),
            handler: Arc::new(JsonDeliveryHandler::new(handler)),
            permits: Arc::new(Semaphore::new(concurrency as usize)),
        });

        let stream = subscribe(&self.inner, &conn, &registration).await?;
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&registration));

        info!(
            queue = %registration.queue,
            handler = registration.handler.name(),
            concurrency = registration.concurrency,
            "Consumer started"
        );
        spawn_consumer(&self.inner, registration, Some(stream));
        Ok(())
    }
}

async fn subscribe(
    inner: &BrokerInner,
    conn: &Arc<dyn BrokerConnection>,
    registration: &ConsumerRegistration,
) -> BrokerResult<DeliveryStream> {
    let channel = inner
        .registry
        .get_or_create(conn, &registration.queue)
        .await?;
    channel.set_prefetch(registration.concurrency).await?;
    channel.consume(&registration.queue, &registration.tag).await
}

/// Run the consumer loop for the current connection generation
pub(super) fn spawn_consumer(
    inner: &Arc<BrokerInner>,
    registration: Arc<ConsumerRegistration>,
    initial: Option<DeliveryStream>,
) {
    let generation = inner.generation.load(Ordering::SeqCst);
    let handle = tokio::spawn(run_consumer(
        Arc::clone(inner),
        registration,
        generation,
        initial,
    ));
    inner.track(handle);
}

async fn run_consumer(
    inner: Arc<BrokerInner>,
    registration: Arc<ConsumerRegistration>,
    generation: u64,
    mut initial: Option<DeliveryStream>,
) {
    let mut shutdown = inner.shutdown.clone();

    loop {
        // a reconnect spawns a replacement loop
        if shutdown.is_shutdown() || inner.is_stale(generation) {
            break;
        }

        let stream = match initial.take() {
            Some(stream) => Ok(stream),
            None => match inner.current_connection() {
                Ok(conn) => subscribe(&inner, &conn, &registration).await,
                Err(e) => Err(e),
            },
        };

        match stream {
            Ok(stream) => {
                debug!(queue = %registration.queue, "Consuming");
                drain(&registration, stream, &mut shutdown).await;
            }
            Err(BrokerError::NotConnected) | Err(BrokerError::ShuttingDown) => {}
            Err(e) => {
                warn!(queue = %registration.queue, error = %e, "Consumer subscription failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(ERROR_RECOVERY_SLEEP_DURATION) => {}
            _ = shutdown.wait() => break,
        }
    }
    debug!(queue = %registration.queue, "Consumer loop stopped");
}

/// Pull deliveries until the stream ends or shutdown is requested
async fn drain(
    registration: &ConsumerRegistration,
    mut stream: DeliveryStream,
    shutdown: &mut ShutdownToken,
) {
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = shutdown.wait() => return,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                warn!(queue = %registration.queue, error = %e, "Delivery stream error");
                return;
            }
            None => {
                debug!(queue = %registration.queue, "Delivery stream ended");
                return;
            }
        };

        let Ok(permit) = Arc::clone(&registration.permits).acquire_owned().await else {
            return;
        };
        let handler = Arc::clone(&registration.handler);
        let queue = registration.queue.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            process_delivery(&queue, handler, delivery, &token).await;
            drop(permit);
        });
    }
}

async fn process_delivery(
    queue: &str,
    handler: Arc<dyn DeliveryHandler>,
    delivery: Box<dyn Delivery>,
    shutdown: &ShutdownToken,
) {
    let payload = delivery.payload().to_vec();
    let name = handler.name();
    let outcome = match execute_guarded_async(async move { handler.handle_payload(payload).await })
        .await
    {
        PanicGuardResult::Success(outcome) => outcome,
        PanicGuardResult::Panicked(msg) => {
            HandlerOutcome::PermanentFailure(format!("handler panicked: {}", msg))
        }
    };

    let redelivered = delivery.redelivered();
    let result = match settlement(&outcome, redelivered) {
        Settlement::Ack => {
            debug!(queue = %queue, handler = name, "Job completed");
            delivery.ack().await
        }
        Settlement::Reject { requeue } => {
            let reason = match &outcome {
                HandlerOutcome::PermanentFailure(r) | HandlerOutcome::TransientFailure(r) => {
                    r.as_str()
                }
                HandlerOutcome::Success => "",
            };
            warn!(
                queue = %queue,
                handler = name,
                reason = %reason,
                redelivered = redelivered,
                requeue = requeue,
                "Job failed"
            );
            delivery.nack(requeue).await
        }
    };

    match result {
        Ok(()) => {}
        // the broker redelivers unsettled messages after the channel closes
        Err(e) if shutdown.is_shutdown() => {
            debug!(queue = %queue, error = %e, "Delivery left unsettled at shutdown");
        }
        Err(e) => error!(queue = %queue, error = %e, "Failed to settle delivery"),
    }
}

impl BrokerInner {
    /// Wait, bounded by the graceful shutdown timeout, until no handler
    /// holds a delivery
    pub(super) async fn wait_for_in_flight(&self) {
        let consumers = self
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for registration in consumers {
            let idle = tokio::time::timeout(
                GRACEFUL_SHUTDOWN_TIMEOUT,
                registration
                    .permits
                    .acquire_many(u32::from(registration.concurrency)),
            )
            .await;
            if idle.is_err() {
                warn!(
                    queue = %registration.queue,
                    "Jobs still running at shutdown, their deliveries will be redelivered"
                );
            }
        }
    }
}
