// Connection lifecycle: connect, supervise, reconnect with backoff, restore

use super::{consumer, topology, BrokerInner};
use crate::application::worker::constants::{
    DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_JITTER,
};
use crate::application::worker::ShutdownToken;
use crate::port::{
    BrokerConnection, BrokerError, ChannelEvent, ConnectionEvent, ConnectionEventKind,
    ConnectionEventSink,
};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    /// Reconnect attempts exhausted; the process should exit
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub reconnect_jitter: Duration,
}

impl BrokerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            reconnect_jitter: DEFAULT_RECONNECT_JITTER,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new("amqp://localhost:5672")
    }
}

impl BrokerInner {
    /// Open a connection under a fresh generation and make it current
    pub(super) async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = ConnectionEventSink::new(generation, self.connection_events.clone());
        let conn = self.connector.connect(&self.config.url, sink).await?;
        *self
            .connection
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&conn));
        debug!(generation = generation, "Broker connection opened");
        Ok(conn)
    }

    /// The live connection, or `NotConnected` while disconnected or reconnecting
    pub(super) fn current_connection(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Closing => return Err(BrokerError::ShuttingDown),
            _ => return Err(BrokerError::NotConnected),
        }
        self.connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(BrokerError::NotConnected)
    }

    /// Reacts to connection lifecycle events until shutdown or failure
    pub(super) async fn supervise(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.wait() => break,
            };
            let Some(event) = event else { break };

            if self.is_stale(event.generation) {
                debug!(generation = event.generation, "Ignoring event from a previous connection");
                continue;
            }

            match event.kind {
                ConnectionEventKind::Error(message) => {
                    if self.closing.load(Ordering::SeqCst) {
                        debug!(error = %message, "Broker connection error during shutdown");
                    } else {
                        warn!(error = %message, "Broker connection error");
                    }
                }
                ConnectionEventKind::Closed { reason } => {
                    if self.closing.load(Ordering::SeqCst) {
                        debug!("Broker connection closed during shutdown");
                        continue;
                    }
                    warn!(
                        reason = reason.as_deref().unwrap_or("unknown"),
                        "Broker connection closed unexpectedly"
                    );
                    self.take_connection();
                    self.registry.clear().await;
                    self.set_state(ConnectionState::Disconnected);

                    if !self.reconnect(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        debug!("Connection supervisor stopped");
    }

    /// Retry until connected (true) or attempts run out / shutdown (false)
    async fn reconnect(self: &Arc<Self>, shutdown: &mut ShutdownToken) -> bool {
        let max_attempts = self.config.max_reconnect_attempts;
        loop {
            let attempt = self.attempt.load(Ordering::SeqCst);
            if attempt >= max_attempts {
                error!(
                    attempts = attempt,
                    "Broker reconnection failed, giving up"
                );
                self.set_state(ConnectionState::Failed);
                return false;
            }

            let delay = self.backoff.delay_for(attempt);
            self.attempt.store(attempt + 1, Ordering::SeqCst);
            info!(
                attempt = attempt + 1,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling broker reconnect"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => return false,
            }
            if self.closing.load(Ordering::SeqCst) {
                return false;
            }

            self.set_state(ConnectionState::Connecting);
            match self.connect().await {
                // close() may have run while the connect was in flight
                Ok(conn) if self.closing.load(Ordering::SeqCst) => {
                    self.abandon(&conn).await;
                    return false;
                }
                Ok(conn) => match self.restore(&conn).await {
                    Ok(()) => {
                        info!(attempt = attempt + 1, "Broker reconnected");
                        return true;
                    }
                    Err(_) if self.closing.load(Ordering::SeqCst) => {
                        self.abandon(&conn).await;
                        return false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to restore topology after reconnect");
                        self.take_connection();
                        let _ = conn.close().await;
                        self.set_state(ConnectionState::Disconnected);
                    }
                },
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Broker reconnect attempt failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    /// Re-declare every known topology once, then resume consumers
    async fn restore(self: &Arc<Self>, conn: &Arc<dyn BrokerConnection>) -> Result<(), BrokerError> {
        let topologies = self
            .topologies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for topology in &topologies {
            topology::provision(conn, &self.registry, topology).await?;
        }
        if self.closing.load(Ordering::SeqCst) {
            return Err(BrokerError::ShuttingDown);
        }

        self.attempt.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);

        let consumers = self
            .consumers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for registration in consumers {
            consumer::spawn_consumer(self, registration, None);
        }
        debug!(
            topologies = topologies.len(),
            "Broker state restored after reconnect"
        );
        Ok(())
    }

    /// Drop a connection opened after shutdown began
    async fn abandon(&self, conn: &Arc<dyn BrokerConnection>) {
        debug!("Closing connection opened during shutdown");
        self.take_connection();
        self.registry.close_all().await;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Failed to close abandoned connection");
        }
    }

    pub(super) async fn listen_channel_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let mut shutdown = self.shutdown.clone();
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.wait() => break,
            };
            match event {
                Some(event) => self.registry.handle_event(event).await,
                None => break,
            }
        }
    }
}
