// Broker Service
//
// One long-lived connection per process, supervised and re-established with
// exponential backoff. Channels are cached per queue; topologies and
// consumers registered on the service are restored after every reconnect.

mod connection;
mod consumer;
mod publisher;
mod registry;
mod topology;

pub use connection::{BrokerConfig, ConnectionState};
pub use consumer::{settlement, Settlement};
pub use registry::ChannelRegistry;

use crate::application::retry::BackoffPolicy;
use crate::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::domain::QueueTopology;
use crate::port::{BrokerConnection, BrokerConnector, BrokerError, ChannelEvent, ConnectionEvent};
use consumer::ConsumerRegistration;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

type EventReceivers = (
    mpsc::UnboundedReceiver<ConnectionEvent>,
    mpsc::UnboundedReceiver<ChannelEvent>,
);

/// Handle to the broker service; cheap to clone
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    config: BrokerConfig,
    connector: Arc<dyn BrokerConnector>,
    backoff: BackoffPolicy,
    connection: RwLock<Option<Arc<dyn BrokerConnection>>>,
    /// Bumped on every connect attempt; events and consumers of an older
    /// generation are stale
    generation: AtomicU64,
    attempt: AtomicU32,
    closing: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    registry: ChannelRegistry,
    topologies: Mutex<Vec<QueueTopology>>,
    consumers: Mutex<Vec<Arc<ConsumerRegistration>>>,
    connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    receivers: Mutex<Option<EventReceivers>>,
    shutdown_tx: ShutdownSender,
    shutdown: ShutdownToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    pub fn new(config: BrokerConfig, connector: Arc<dyn BrokerConnector>) -> Self {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (chan_tx, chan_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown) = shutdown_channel();
        let backoff = BackoffPolicy::new(
            config.initial_backoff,
            config.max_backoff,
            config.reconnect_jitter,
        );

        Self {
            inner: Arc::new(BrokerInner {
                config,
                connector,
                backoff,
                connection: RwLock::new(None),
                generation: AtomicU64::new(0),
                attempt: AtomicU32::new(0),
                closing: AtomicBool::new(false),
                state_tx,
                registry: ChannelRegistry::new(chan_tx),
                topologies: Mutex::new(Vec::new()),
                consumers: Mutex::new(Vec::new()),
                connection_events: conn_tx,
                receivers: Mutex::new(Some((conn_rx, chan_rx))),
                shutdown_tx,
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Open the initial connection and start supervising it.
    ///
    /// A failed first connect is returned to the caller; reconnection only
    /// kicks in for connections that were established once.
    pub async fn initialize(&self) -> Result<(), BrokerError> {
        let inner = &self.inner;
        if inner.closing.load(Ordering::SeqCst) {
            return Err(BrokerError::ShuttingDown);
        }

        let receivers = inner.lock_receivers().take();
        let Some((conn_rx, chan_rx)) = receivers else {
            return match inner.state() {
                ConnectionState::Connected => Ok(()),
                state => Err(BrokerError::Connection(format!(
                    "broker already initialized (state: {})",
                    state
                ))),
            };
        };

        inner.set_state(ConnectionState::Connecting);
        if let Err(e) = inner.connect().await {
            error!(error = %e, "Initial broker connection failed");
            inner.set_state(ConnectionState::Disconnected);
            *inner.lock_receivers() = Some((conn_rx, chan_rx));
            return Err(e);
        }
        inner.attempt.store(0, Ordering::SeqCst);
        inner.set_state(ConnectionState::Connected);

        let supervisor = tokio::spawn(Arc::clone(inner).supervise(conn_rx));
        let listener = tokio::spawn(Arc::clone(inner).listen_channel_events(chan_rx));
        inner.track(supervisor);
        inner.track(listener);

        info!("Broker connection established");
        Ok(())
    }

    /// Declare the dead-letter exchange and queue, their binding, the
    /// primary queue (and its retry queue if any). The topology is
    /// remembered and re-declared after each reconnect.
    pub async fn setup_queue_with_dlx(&self, topology: &QueueTopology) -> Result<(), BrokerError> {
        let conn = self.inner.current_connection()?;
        topology::provision(&conn, &self.inner.registry, topology).await?;

        {
            let mut topologies = self
                .inner
                .topologies
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match topologies
                .iter_mut()
                .find(|t| t.queue_name == topology.queue_name)
            {
                Some(existing) => *existing = topology.clone(),
                None => topologies.push(topology.clone()),
            }
        }

        info!(
            queue = %topology.queue_name,
            dead_letter_exchange = %topology.dead_letter_exchange,
            dead_letter_queue = %topology.dead_letter_queue_name,
            "Queue topology declared"
        );
        Ok(())
    }

    /// Intentional close: in-flight jobs are settled first, then channels,
    /// then the connection. Unexpected close handling is suppressed from
    /// here on.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.set_state(ConnectionState::Closing);
        inner.shutdown_tx.shutdown();

        inner.wait_for_in_flight().await;
        inner.registry.close_all().await;
        let conn = inner.take_connection();
        let result = match conn {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };

        let tasks: Vec<JoinHandle<()>> = inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = tokio::time::timeout(
                crate::application::worker::constants::GRACEFUL_SHUTDOWN_TIMEOUT,
                task,
            )
            .await;
        }

        inner.set_state(ConnectionState::Disconnected);
        info!("Broker connection closed");
        result
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch connection state changes (e.g. to exit once it turns `Failed`)
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnect attempts since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempt.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.inner.registry
    }
}

impl BrokerInner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Broker state changed");
        }
    }

    fn lock_receivers(&self) -> std::sync::MutexGuard<'_, Option<EventReceivers>> {
        self.receivers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        self.connection
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }
}
