// In-memory broker for tests
//
// Routes through the default exchange and honours dead-letter arguments, so
// rejected and expired deliveries land where they would on RabbitMQ.
// Faults (refused connects, dropped connections, channel errors) are injected
// through the `InMemoryBroker` handle.

use super::*;
use crate::domain::QueueSpec;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub options: PublishOptions,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

struct Message {
    payload: Vec<u8>,
    redelivered: bool,
    expiration_ms: Option<u64>,
}

struct Subscription {
    tx: mpsc::UnboundedSender<BrokerResult<Box<dyn Delivery>>>,
    channel_open: Arc<AtomicBool>,
}

#[derive(Default)]
struct QueueState {
    spec: Option<QueueSpec>,
    buffer: VecDeque<Message>,
    consumer: Option<Subscription>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    exchanges: HashMap<String, usize>,
    bindings: Vec<(String, String, String)>, // (queue, exchange, routing_key)
    queue_declarations: HashMap<String, usize>,
    published: Vec<PublishedMessage>,
    acked: Vec<(String, Vec<u8>)>,
    requeued: Vec<(String, Vec<u8>)>,
    dead_lettered: Vec<(String, Vec<u8>)>,
    prefetch: HashMap<String, u16>,
    connect_calls: usize,
    refuse_connects: usize,
    refuse_all_connects: bool,
    reject_publishes: bool,
    current: Option<Arc<MemoryConnection>>,
}

impl State {
    fn queue(&mut self, name: &str) -> &mut QueueState {
        self.queues.entry(name.to_string()).or_default()
    }

    fn deliver(&mut self, shared: &Arc<Mutex<State>>, queue: &str, message: Message) {
        let entry = self.queue(queue);
        if let Some(subscription) = &entry.consumer {
            let delivery: Box<dyn Delivery> = Box::new(MemoryDelivery {
                queue: queue.to_string(),
                payload: message.payload.clone(),
                redelivered: message.redelivered,
                settled: AtomicBool::new(false),
                channel_open: Arc::clone(&subscription.channel_open),
                state: Arc::clone(shared),
            });
            if subscription.tx.send(Ok(delivery)).is_ok() {
                return;
            }
            entry.consumer = None;
        }
        entry.buffer.push_back(message);
    }

    fn dead_letter(&mut self, shared: &Arc<Mutex<State>>, queue: &str, payload: Vec<u8>) {
        self.dead_lettered.push((queue.to_string(), payload.clone()));
        self.route_dead_letter(shared, queue, payload);
    }

    /// Follow the queue's `x-dead-letter-*` arguments. The expiration is
    /// dropped on the way, as RabbitMQ does.
    fn route_dead_letter(&mut self, shared: &Arc<Mutex<State>>, queue: &str, payload: Vec<u8>) {
        let target = self
            .queues
            .get(queue)
            .and_then(|q| q.spec.as_ref())
            .and_then(|spec| spec.dead_letter.clone());
        let Some(target) = target else {
            return; // no DLX: the message is dropped
        };
        let destinations: Vec<String> = if target.exchange.is_empty() {
            vec![target.routing_key.clone()]
        } else {
            self.bindings
                .iter()
                .filter(|(_, ex, key)| *ex == target.exchange && *key == target.routing_key)
                .map(|(q, _, _)| q.clone())
                .collect()
        };
        for destination in destinations {
            self.deliver(
                shared,
                &destination,
                Message {
                    payload: payload.clone(),
                    redelivered: false,
                    expiration_ms: None,
                },
            );
        }
    }
}

/// Fake broker handle; cheap to clone
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_connects(&self, n: usize) {
        self.state.lock().unwrap().refuse_connects = n;
    }

    /// Refuse every connection attempt until switched off
    pub fn refuse_all_connects(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_all_connects = refuse;
    }

    /// Make `publish` report that the frame was not accepted
    pub fn reject_publishes(&self, reject: bool) {
        self.state.lock().unwrap().reject_publishes = reject;
    }

    /// Simulate an unintentional connection loss
    pub fn drop_connection(&self) {
        let current = {
            let mut state = self.state.lock().unwrap();
            for queue in state.queues.values_mut() {
                queue.consumer = None;
            }
            state.current.take()
        };
        if let Some(conn) = current {
            conn.kill();
            conn.events.error("connection reset by peer");
            conn.events.closed(Some("connection reset by peer".to_string()));
        }
    }

    /// Simulate a channel-level error on the open channel serving `queue`
    pub fn fail_channel(&self, queue: &str) {
        let current = self.state.lock().unwrap().current.clone();
        if let Some(conn) = current {
            for channel in conn.channels.lock().unwrap().iter() {
                if channel.events.queue() == queue && channel.open.swap(false, Ordering::SeqCst) {
                    channel.events.error("simulated channel failure");
                    channel.events.closed();
                }
            }
        }
        let mut state = self.state.lock().unwrap();
        if let Some(q) = state.queues.get_mut(queue) {
            q.consumer = None;
        }
    }

    /// Put a raw message on a queue, as another producer would
    pub fn inject(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.deliver(
            &self.state,
            queue,
            Message {
                payload: payload.into(),
                redelivered: false,
                expiration_ms: None,
            },
        );
    }

    /// Let every waiting message with a per-message TTL on `queue` expire.
    /// Expired messages are dead-lettered through the queue's arguments;
    /// returns how many expired.
    pub fn expire(&self, queue: &str) -> usize {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.queues.get_mut(queue) else {
            return 0;
        };
        let (expired, kept): (VecDeque<Message>, VecDeque<Message>) = entry
            .buffer
            .drain(..)
            .partition(|m| m.expiration_ms.is_some());
        entry.buffer = kept;

        let count = expired.len();
        for message in expired {
            state.route_dead_letter(&self.state, queue, message.payload);
        }
        count
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().unwrap().connect_calls
    }

    pub fn exchange_declarations(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .exchanges
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn queue_declarations(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queue_declarations
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn queue_spec(&self, name: &str) -> Option<QueueSpec> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(name)
            .and_then(|q| q.spec.clone())
    }

    pub fn is_bound(&self, queue: &str, exchange: &str, routing_key: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .bindings
            .iter()
            .any(|(q, ex, key)| q == queue && ex == exchange && key == routing_key)
    }

    pub fn published(&self, queue: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|m| m.queue == queue)
            .cloned()
            .collect()
    }

    pub fn acked(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .acked
            .iter()
            .filter(|(q, _)| q == queue)
            .count()
    }

    pub fn requeued(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requeued
            .iter()
            .filter(|(q, _)| q == queue)
            .count()
    }

    /// Messages rejected without requeue from `queue`
    pub fn dead_lettered(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .dead_lettered
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Messages waiting in `queue` with no consumer attached
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.buffer.len())
            .unwrap_or(0)
    }

    pub fn prefetch(&self, queue: &str) -> Option<u16> {
        self.state.lock().unwrap().prefetch.get(queue).copied()
    }

    pub fn open_channels(&self) -> usize {
        let current = self.state.lock().unwrap().current.clone();
        current
            .map(|conn| {
                conn.channels
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|c| c.open.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(
        &self,
        _url: &str,
        events: ConnectionEventSink,
    ) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        if state.refuse_all_connects {
            return Err(BrokerError::Connection("connection refused".to_string()));
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(BrokerError::Connection("connection refused".to_string()));
        }
        let conn = Arc::new(MemoryConnection {
            alive: AtomicBool::new(true),
            events,
            channels: Mutex::new(Vec::new()),
            next_channel: AtomicU64::new(1),
            state: Arc::clone(&self.state),
        });
        state.current = Some(Arc::clone(&conn));
        Ok(conn)
    }
}

struct MemoryConnection {
    alive: AtomicBool,
    events: ConnectionEventSink,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
    next_channel: AtomicU64,
    state: Arc<Mutex<State>>,
}

impl MemoryConnection {
    fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        for channel in self.channels.lock().unwrap().iter() {
            channel.open.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self, events: ChannelEventSink) -> BrokerResult<Arc<dyn BrokerChannel>> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }
        let channel = Arc::new(MemoryChannel {
            id: self.next_channel.fetch_add(1, Ordering::SeqCst),
            open: Arc::new(AtomicBool::new(true)),
            events,
            state: Arc::clone(&self.state),
        });
        self.channels.lock().unwrap().push(Arc::clone(&channel));
        Ok(channel)
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> BrokerResult<()> {
        self.kill();
        let mut state = self.state.lock().unwrap();
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }
        state.current = None;
        drop(state);
        self.events.closed(None);
        Ok(())
    }
}

struct MemoryChannel {
    id: u64,
    open: Arc<AtomicBool>,
    events: ChannelEventSink,
    state: Arc<Mutex<State>>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Channel {
                queue: self.events.queue().to_string(),
                message: format!("channel {} is closed", self.id),
            })
        }
    }

    /// A PRECONDITION_FAILED closes the channel on a real broker
    fn fail_precondition(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.events.error("PRECONDITION_FAILED");
            self.events.closed();
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, name: &str) -> BrokerResult<()> {
        self.ensure_open()?;
        *self
            .state
            .lock()
            .unwrap()
            .exchanges
            .entry(name.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn declare_queue(&self, name: &str, spec: &QueueSpec) -> BrokerResult<()> {
        self.ensure_open()?;
        let mismatch = {
            let mut state = self.state.lock().unwrap();
            *state
                .queue_declarations
                .entry(name.to_string())
                .or_insert(0) += 1;
            let queue = state.queue(name);
            match &queue.spec {
                Some(existing) if existing != spec => true,
                Some(_) => false,
                None => {
                    queue.spec = Some(spec.clone());
                    false
                }
            }
        };
        if mismatch {
            self.fail_precondition();
            return Err(BrokerError::TopologyMismatch {
                name: name.to_string(),
                message: "PRECONDITION_FAILED - inequivalent arguments".to_string(),
            });
        }
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();
        let binding = (
            queue.to_string(),
            exchange.to_string(),
            routing_key.to_string(),
        );
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> BrokerResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();
        if state.reject_publishes {
            return Ok(false);
        }
        state.published.push(PublishedMessage {
            queue: queue.to_string(),
            payload: payload.to_vec(),
            options: options.clone(),
        });
        state.deliver(
            &self.state,
            queue,
            Message {
                payload: payload.to_vec(),
                redelivered: false,
                expiration_ms: options.expiration_ms,
            },
        );
        Ok(true)
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        self.ensure_open()?;
        self.state
            .lock()
            .unwrap()
            .prefetch
            .insert(self.events.queue().to_string(), count);
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock().unwrap();
            let pending: Vec<Message> = state.queue(queue).buffer.drain(..).collect();
            state.queue(queue).consumer = Some(Subscription {
                tx,
                channel_open: Arc::clone(&self.open),
            });
            for message in pending {
                state.deliver(&self.state, queue, message);
            }
        }
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.events.closed();
        }
        Ok(())
    }
}

struct MemoryDelivery {
    queue: String,
    payload: Vec<u8>,
    redelivered: bool,
    settled: AtomicBool,
    channel_open: Arc<AtomicBool>,
    state: Arc<Mutex<State>>,
}

impl MemoryDelivery {
    fn settle(&self) -> BrokerResult<()> {
        // delivery tags die with their channel
        if !self.channel_open.load(Ordering::SeqCst) {
            return Err(BrokerError::Ack(format!(
                "channel consuming {} is closed",
                self.queue
            )));
        }
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::Ack(
                "PRECONDITION_FAILED - unknown delivery tag".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(&self) -> BrokerResult<()> {
        self.settle()?;
        self.state
            .lock()
            .unwrap()
            .acked
            .push((self.queue.clone(), self.payload.clone()));
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.settle()?;
        let mut state = self.state.lock().unwrap();
        if requeue {
            state
                .requeued
                .push((self.queue.clone(), self.payload.clone()));
            state.deliver(
                &self.state,
                &self.queue,
                Message {
                    payload: self.payload.clone(),
                    redelivered: true,
                    expiration_ms: None,
                },
            );
        } else {
            state.dead_letter(&self.state, &self.queue, self.payload.clone());
        }
        Ok(())
    }
}
