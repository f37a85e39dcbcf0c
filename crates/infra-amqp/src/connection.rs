// AMQP connection (lapin)

use crate::channel::LapinChannel;
use crate::error::{map_channel_error, map_connection_error};
use async_trait::async_trait;
use lapin::types::LongString;
use lapin::{Connection, ConnectionProperties};
use paydesk_core::port::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, BrokerResult,
    ChannelEventSink, ConnectionEventSink,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// AMQP reply code for a normal close
pub(crate) const REPLY_SUCCESS: u16 = 200;

/// Opens lapin connections
pub struct LapinConnector {
    connection_name: String,
}

impl LapinConnector {
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
        }
    }
}

impl Default for LapinConnector {
    fn default() -> Self {
        Self::new("paydesk")
    }
}

#[async_trait]
impl BrokerConnector for LapinConnector {
    async fn connect(
        &self,
        url: &str,
        events: ConnectionEventSink,
    ) -> BrokerResult<Arc<dyn BrokerConnection>> {
        let properties = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.as_str()));
        let connection = Connection::connect(url, properties)
            .await
            .map_err(map_connection_error)?;

        info!(
            generation = events.generation(),
            name = %self.connection_name,
            "AMQP connection opened"
        );
        Ok(Arc::new(LapinConnection::new(connection, events)))
    }
}

pub struct LapinConnection {
    connection: Connection,
    events: ConnectionEventSink,
    closed: Arc<AtomicBool>,
}

impl LapinConnection {
    fn new(connection: Connection, events: ConnectionEventSink) -> Self {
        let closed = Arc::new(AtomicBool::new(false));

        // lapin reports broker-initiated closes and socket failures as errors;
        // either way the connection is gone afterwards
        let sink = events.clone();
        let flag = Arc::clone(&closed);
        connection.on_error(move |err| {
            let message = err.to_string();
            sink.error(message.clone());
            if !flag.swap(true, Ordering::SeqCst) {
                sink.closed(Some(message));
            }
        });

        Self {
            connection,
            events,
            closed,
        }
    }
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn open_channel(&self, events: ChannelEventSink) -> BrokerResult<Arc<dyn BrokerChannel>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| map_channel_error(events.queue(), e))?;
        debug!(queue = %events.queue(), channel_id = channel.id(), "AMQP channel opened");
        Ok(Arc::new(LapinChannel::new(channel, events)))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.connection.status().connected()
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .connection
            .close(REPLY_SUCCESS, "Bye")
            .await
            .map_err(map_connection_error);
        self.events.closed(None);
        result
    }
}
