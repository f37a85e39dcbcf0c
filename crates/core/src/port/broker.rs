// Message Broker Port
//
// Connection -> channel -> delivery, modelled after AMQP 0.9.1. The job
// engine in `application::broker` only talks to these traits, so the whole
// pipeline runs against `mocks::InMemoryBroker` in tests.

pub mod mocks;

use crate::domain::QueueSpec;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Broker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel error on {queue}: {message}")]
    Channel { queue: String, message: String },

    #[error("Topology mismatch for {name}: {message}")]
    TopologyMismatch { name: String, message: String },

    #[error("Declaration failed for {name}: {message}")]
    Declaration { name: String, message: String },

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Broker is shutting down")]
    ShuttingDown,
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

// ============================================================================
// Lifecycle events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// Logged only. Brokers close the socket after a fatal error, and the
    /// close is what drives reconnection.
    Error(String),
    Closed { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub generation: u64,
    pub kind: ConnectionEventKind,
}

/// Handed to a connector so the connection it creates can report lifecycle events
#[derive(Clone)]
pub struct ConnectionEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ConnectionEventKind::Error(message.into()));
    }

    pub fn closed(&self, reason: Option<String>) {
        self.emit(ConnectionEventKind::Closed { reason });
    }

    fn emit(&self, kind: ConnectionEventKind) {
        // Receiver is gone only after the broker service was dropped
        let _ = self.tx.send(ConnectionEvent {
            generation: self.generation,
            kind,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEventKind {
    Error(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub queue: String,
    pub generation: u64,
    pub kind: ChannelEventKind,
}

/// Handed to a connection when opening a channel
#[derive(Clone)]
pub struct ChannelEventSink {
    queue: String,
    generation: u64,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelEventSink {
    pub fn new(
        queue: impl Into<String>,
        generation: u64,
        tx: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            queue: queue.into(),
            generation,
            tx,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ChannelEventKind::Error(message.into()));
    }

    pub fn closed(&self) {
        self.emit(ChannelEventKind::Closed);
    }

    fn emit(&self, kind: ChannelEventKind) {
        let _ = self.tx.send(ChannelEvent {
            queue: self.queue.clone(),
            generation: self.generation,
            kind,
        });
    }
}

// ============================================================================
// Connection / channel / delivery
// ============================================================================

/// Opens physical connections
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect to the broker at `url`. The returned connection reports its
    /// lifecycle through `events`.
    async fn connect(
        &self,
        url: &str,
        events: ConnectionEventSink,
    ) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a multiplexed channel on this connection
    async fn open_channel(&self, events: ChannelEventSink) -> BrokerResult<Arc<dyn BrokerChannel>>;

    fn is_connected(&self) -> bool;

    /// Intentional close
    async fn close(&self) -> BrokerResult<()>;
}

/// Publish options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Per-message TTL; the message is dead-lettered by the queue when it expires
    pub expiration_ms: Option<u64>,
}

impl PublishOptions {
    pub fn expiring_after(ms: u64) -> Self {
        Self {
            expiration_ms: Some(ms),
        }
    }
}

pub type DeliveryStream = BoxStream<'static, BrokerResult<Box<dyn Delivery>>>;

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable direct exchange
    async fn declare_exchange(&self, name: &str) -> BrokerResult<()>;

    /// Declare a queue. Redeclaring with identical arguments is a no-op;
    /// different arguments yield `BrokerError::TopologyMismatch`.
    async fn declare_queue(&self, name: &str, spec: &QueueSpec) -> BrokerResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()>;

    /// Publish a persistent message through the default exchange with
    /// routing key `queue`. `Ok(true)` means the client accepted the frame.
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> BrokerResult<bool>;

    /// Maximum unacknowledged deliveries for consumers on this channel
    async fn set_prefetch(&self, count: u16) -> BrokerResult<()>;

    /// Subscribe with manual acknowledgement
    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> BrokerResult<()>;
}

#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// Set by the broker when this message was delivered before
    fn redelivered(&self) -> bool;

    async fn ack(&self) -> BrokerResult<()>;

    async fn nack(&self, requeue: bool) -> BrokerResult<()>;
}
