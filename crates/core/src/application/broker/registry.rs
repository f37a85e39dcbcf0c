// Channel Registry
//
// At most one cached channel per queue. A cached channel is dropped as soon
// as its own channel reports an error or close; events carry the channel's
// generation so a late event never evicts a newer channel.

use crate::domain::QueueSpec;
use crate::port::{
    BrokerChannel, BrokerConnection, BrokerResult, ChannelEvent, ChannelEventKind,
    ChannelEventSink,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

struct CachedChannel {
    generation: u64,
    channel: Arc<dyn BrokerChannel>,
}

pub struct ChannelRegistry {
    channels: tokio::sync::Mutex<HashMap<String, CachedChannel>>,
    /// Declaration arguments per queue, so re-assertions never conflict
    specs: Mutex<HashMap<String, QueueSpec>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
}

impl ChannelRegistry {
    pub fn new(events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            channels: tokio::sync::Mutex::new(HashMap::new()),
            specs: Mutex::new(HashMap::new()),
            events,
            next_generation: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Event sink for a channel that is about to be opened
    pub fn sink(&self, label: &str) -> ChannelEventSink {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        ChannelEventSink::new(label, generation, self.events.clone())
    }

    pub fn record_spec(&self, queue: &str, spec: QueueSpec) {
        self.specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(queue.to_string(), spec);
    }

    /// Arguments to assert `queue` with; plain durable if never provisioned
    pub fn spec_for(&self, queue: &str) -> QueueSpec {
        self.specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(queue)
            .cloned()
            .unwrap_or_else(QueueSpec::durable)
    }

    /// Cached open channel for `queue`, or a new one with the queue asserted
    pub async fn get_or_create(
        &self,
        conn: &Arc<dyn BrokerConnection>,
        queue: &str,
    ) -> BrokerResult<Arc<dyn BrokerChannel>> {
        let mut channels = self.channels.lock().await;
        if let Some(cached) = channels.get(queue) {
            if cached.channel.is_open() {
                return Ok(Arc::clone(&cached.channel));
            }
            debug!(queue = %queue, "Discarding closed channel");
            channels.remove(queue);
        }

        let sink = self.sink(queue);
        let generation = sink.generation();
        let channel = conn.open_channel(sink).await?;

        let spec = self.spec_for(queue);
        if let Err(e) = channel.declare_queue(queue, &spec).await {
            error!(queue = %queue, error = %e, "Queue assertion failed");
            if channel.is_open() {
                let _ = channel.close().await;
            }
            return Err(e);
        }

        channels.insert(
            queue.to_string(),
            CachedChannel {
                generation,
                channel: Arc::clone(&channel),
            },
        );
        debug!(queue = %queue, generation = generation, "Channel opened");
        Ok(channel)
    }

    /// Remove the cached channel for `queue`. With `generation` set, only
    /// that exact channel is removed.
    pub async fn evict(&self, queue: &str, generation: Option<u64>) -> bool {
        let mut channels = self.channels.lock().await;
        let matches = match (channels.get(queue), generation) {
            (Some(cached), Some(generation)) => cached.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            channels.remove(queue);
        }
        matches
    }

    pub async fn handle_event(&self, event: ChannelEvent) {
        let evicted = self.evict(&event.queue, Some(event.generation)).await;
        let quiet = self.shutting_down.load(Ordering::SeqCst) || !evicted;

        match (&event.kind, quiet) {
            (ChannelEventKind::Error(message), false) => {
                error!(queue = %event.queue, error = %message, "Channel error, evicted from registry")
            }
            (ChannelEventKind::Closed, false) => {
                warn!(queue = %event.queue, "Channel closed, evicted from registry")
            }
            (kind, true) => {
                debug!(queue = %event.queue, generation = event.generation, kind = ?kind, "Channel event")
            }
        }
    }

    /// Forget every cached channel (their connection is gone)
    pub async fn clear(&self) {
        self.channels.lock().await.clear();
    }

    /// Close every cached channel, for intentional shutdown
    pub async fn close_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<(String, CachedChannel)> =
            self.channels.lock().await.drain().collect();
        for (queue, cached) in drained {
            if !cached.channel.is_open() {
                continue;
            }
            if let Err(e) = cached.channel.close().await {
                debug!(queue = %queue, error = %e, "Channel close failed");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn contains(&self, queue: &str) -> bool {
        self.channels.lock().await.contains_key(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueTopology;
    use crate::port::broker::mocks::InMemoryBroker;
    use crate::port::{BrokerConnector, ConnectionEventSink};

    async fn setup() -> (
        InMemoryBroker,
        Arc<dyn BrokerConnection>,
        ChannelRegistry,
        mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let broker = InMemoryBroker::new();
        let (conn_tx, _conn_rx) = mpsc::unbounded_channel();
        let conn = broker
            .connect("amqp://test", ConnectionEventSink::new(1, conn_tx))
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (broker, conn, ChannelRegistry::new(tx), rx)
    }

    #[tokio::test]
    async fn test_channel_is_reused() {
        let (broker, conn, registry, _rx) = setup().await;

        let a = registry.get_or_create(&conn, "jobs").await.unwrap();
        let b = registry.get_or_create(&conn, "jobs").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(broker.open_channels(), 1);
        assert_eq!(broker.queue_declarations("jobs"), 1);
    }

    #[tokio::test]
    async fn test_channel_error_evicts_and_recreates() {
        let (broker, conn, registry, mut rx) = setup().await;
        let first = registry.get_or_create(&conn, "jobs").await.unwrap();

        broker.fail_channel("jobs");
        while let Ok(event) = rx.try_recv() {
            registry.handle_event(event).await;
        }
        assert!(!registry.contains("jobs").await);

        let second = registry.get_or_create(&conn, "jobs").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_open());
    }

    #[tokio::test]
    async fn test_stale_event_does_not_evict_newer_channel() {
        let (_broker, conn, registry, _rx) = setup().await;
        registry.get_or_create(&conn, "jobs").await.unwrap();

        registry
            .handle_event(ChannelEvent {
                queue: "jobs".into(),
                generation: 999,
                kind: ChannelEventKind::Closed,
            })
            .await;
        assert!(registry.contains("jobs").await);
    }

    #[tokio::test]
    async fn test_asserts_queue_with_recorded_spec() {
        let (broker, conn, registry, _rx) = setup().await;
        let topology = QueueTopology::payroll_generation();
        registry.record_spec(&topology.queue_name, topology.primary_spec());

        registry
            .get_or_create(&conn, &topology.queue_name)
            .await
            .unwrap();
        assert_eq!(
            broker.queue_spec(&topology.queue_name),
            Some(topology.primary_spec())
        );
    }

    #[tokio::test]
    async fn test_mismatched_assertion_is_an_error() {
        let (_broker, conn, registry, _rx) = setup().await;
        let topology = QueueTopology::payroll_generation();

        // first assertion as a plain durable queue
        registry.get_or_create(&conn, &topology.queue_name).await.unwrap();
        registry.clear().await;

        registry.record_spec(&topology.queue_name, topology.primary_spec());
        let result = registry.get_or_create(&conn, &topology.queue_name).await;
        assert!(matches!(
            result,
            Err(crate::port::BrokerError::TopologyMismatch { .. })
        ));
        assert!(!registry.contains(&topology.queue_name).await);
    }

    #[tokio::test]
    async fn test_close_all_closes_each_channel_once() {
        let (broker, conn, registry, _rx) = setup().await;
        registry.get_or_create(&conn, "a").await.unwrap();
        registry.get_or_create(&conn, "b").await.unwrap();
        assert_eq!(registry.len().await, 2);

        registry.close_all().await;
        assert_eq!(registry.len().await, 0);
        assert_eq!(broker.open_channels(), 0);
    }
}
