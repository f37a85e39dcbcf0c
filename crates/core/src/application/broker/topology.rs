// Queue topology provisioning (DLX, DLQ, binding, primary and retry queues)

use super::registry::ChannelRegistry;
use crate::domain::{QueueSpec, QueueTopology};
use crate::port::{BrokerChannel, BrokerConnection, BrokerResult};
use std::sync::Arc;
use tracing::debug;

/// Declare `topology` on a short-lived channel of its own, so a declaration
/// failure never takes down a cached publish/consume channel.
pub(super) async fn provision(
    conn: &Arc<dyn BrokerConnection>,
    registry: &ChannelRegistry,
    topology: &QueueTopology,
) -> BrokerResult<()> {
    let label = format!("topology:{}", topology.queue_name);
    let channel = conn.open_channel(registry.sink(&label)).await?;

    let result = declare(channel.as_ref(), topology).await;
    if channel.is_open() {
        let _ = channel.close().await;
    }
    result?;

    registry.record_spec(&topology.dead_letter_queue_name, QueueSpec::durable());
    registry.record_spec(&topology.queue_name, topology.primary_spec());
    if let Some((retry_queue, spec)) = topology.retry_spec() {
        registry.record_spec(&retry_queue, spec);
    }
    Ok(())
}

async fn declare(channel: &dyn BrokerChannel, topology: &QueueTopology) -> BrokerResult<()> {
    channel
        .declare_exchange(&topology.dead_letter_exchange)
        .await?;
    channel
        .declare_queue(&topology.dead_letter_queue_name, &QueueSpec::durable())
        .await?;
    channel
        .bind_queue(
            &topology.dead_letter_queue_name,
            &topology.dead_letter_exchange,
            &topology.dead_letter_routing_key,
        )
        .await?;
    channel
        .declare_queue(&topology.queue_name, &topology.primary_spec())
        .await?;

    if let Some((retry_queue, spec)) = topology.retry_spec() {
        channel.declare_queue(&retry_queue, &spec).await?;
        debug!(queue = %retry_queue, target = %topology.queue_name, "Retry queue declared");
    }
    Ok(())
}
