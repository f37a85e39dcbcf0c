// Publishing through cached channels

use super::Broker;
use crate::port::{BrokerError, BrokerResult, JobPublisher, PublishOptions};
use async_trait::async_trait;
use tracing::{debug, warn};

impl Broker {
    /// Publish a persistent message to `queue` via the default exchange.
    ///
    /// Errors only when there is no connection. Channel-level failures are
    /// reported as `Ok(false)` after the channel has been evicted, so the
    /// next publish opens a fresh one.
    pub async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> BrokerResult<bool> {
        let conn = self.inner.current_connection()?;

        let channel = match self.inner.registry.get_or_create(&conn, queue).await {
            Ok(channel) => channel,
            Err(BrokerError::NotConnected) => return Err(BrokerError::NotConnected),
            Err(e) => {
                warn!(queue = %queue, error = %e, "No channel available for publish");
                return Ok(false);
            }
        };

        match channel.publish(queue, payload, &options).await {
            Ok(true) => {
                debug!(queue = %queue, bytes = payload.len(), "Message published");
                Ok(true)
            }
            Ok(false) => {
                warn!(queue = %queue, "Broker client refused message");
                Ok(false)
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "Publish failed, evicting channel");
                self.inner.registry.evict(queue, None).await;
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl JobPublisher for Broker {
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> BrokerResult<bool> {
        Broker::publish(self, queue, payload, options).await
    }
}
