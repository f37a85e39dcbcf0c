// AMQP channel and deliveries (lapin)

use crate::arguments::{publish_properties, queue_arguments};
use crate::connection::REPLY_SUCCESS;
use crate::error::{is_precondition_failed, map_channel_error, map_declare_error};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use paydesk_core::domain::QueueSpec;
use paydesk_core::port::{
    BrokerChannel, BrokerError, BrokerResult, ChannelEventSink, Delivery, DeliveryStream,
    PublishOptions,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Routing through the default exchange
const DEFAULT_EXCHANGE: &str = "";

pub struct LapinChannel {
    channel: Channel,
    events: ChannelEventSink,
    open: Arc<AtomicBool>,
}

impl LapinChannel {
    pub(crate) fn new(channel: Channel, events: ChannelEventSink) -> Self {
        let open = Arc::new(AtomicBool::new(true));

        let sink = events.clone();
        let flag = Arc::clone(&open);
        channel.on_error(move |err| {
            if flag.swap(false, Ordering::SeqCst) {
                sink.error(err.to_string());
                sink.closed();
            }
        });

        Self {
            channel,
            events,
            open,
        }
    }

    /// The broker closes a channel after an error; report it once
    fn mark_failed(&self, err: &lapin::Error) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.events.error(err.to_string());
            self.events.closed();
        }
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn declare_exchange(&self, name: &str) -> BrokerResult<()> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(name, ExchangeKind::Direct, options, FieldTable::default())
            .await
            .map_err(|e| {
                self.mark_failed(&e);
                map_declare_error(name, e)
            })
    }

    async fn declare_queue(&self, name: &str, spec: &QueueSpec) -> BrokerResult<()> {
        let options = QueueDeclareOptions {
            durable: spec.durable,
            ..QueueDeclareOptions::default()
        };
        match self
            .channel
            .queue_declare(name, options, queue_arguments(spec))
            .await
        {
            Ok(queue) => {
                debug!(queue = %name, messages = queue.message_count(), "Queue asserted");
                Ok(())
            }
            Err(e) => {
                if is_precondition_failed(&e) {
                    self.mark_failed(&e);
                }
                Err(map_declare_error(name, e))
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_declare_error(queue, e))
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> BrokerResult<bool> {
        if !self.is_open() {
            return Ok(false);
        }
        self.channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                queue,
                BasicPublishOptions::default(),
                payload,
                publish_properties(options),
            )
            .await
            .map(|_confirm| true)
            .map_err(|e| map_channel_error(queue, e))
    }

    async fn set_prefetch(&self, count: u16) -> BrokerResult<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| map_channel_error(self.events.queue(), e))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("{}: {}", queue, e)))?;

        let queue = queue.to_string();
        let stream = consumer.map(move |item| match item {
            Ok(delivery) => {
                let delivery: Box<dyn Delivery> = Box::new(LapinDelivery { delivery });
                Ok(delivery)
            }
            Err(e) => Err(map_channel_error(&queue, e)),
        });
        Ok(stream.boxed())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.channel.status().connected()
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .channel
            .close(REPLY_SUCCESS, "Bye")
            .await
            .map_err(|e| map_channel_error(self.events.queue(), e));
        self.events.closed();
        result
    }
}

struct LapinDelivery {
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for LapinDelivery {
    fn payload(&self) -> &[u8] {
        &self.delivery.data
    }

    fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    async fn ack(&self) -> BrokerResult<()> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> BrokerResult<()> {
        self.delivery
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
