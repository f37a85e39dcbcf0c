// Declaration and publish arguments

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::BasicProperties;
use paydesk_core::domain::QueueSpec;
use paydesk_core::port::PublishOptions;

pub(crate) const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
pub(crate) const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";

/// Persistent delivery mode
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// `x-dead-letter-*` arguments for a queue declaration
pub(crate) fn queue_arguments(spec: &QueueSpec) -> FieldTable {
    let mut args = FieldTable::default();
    if let Some(target) = &spec.dead_letter {
        args.insert(
            ShortString::from(DEAD_LETTER_EXCHANGE_ARG),
            AMQPValue::LongString(LongString::from(target.exchange.as_str())),
        );
        args.insert(
            ShortString::from(DEAD_LETTER_ROUTING_KEY_ARG),
            AMQPValue::LongString(LongString::from(target.routing_key.as_str())),
        );
    }
    args
}

/// Persistent JSON message, optionally expiring
pub(crate) fn publish_properties(options: &PublishOptions) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
        .with_content_type(ShortString::from("application/json"));
    match options.expiration_ms {
        Some(ms) => properties.with_expiration(ShortString::from(ms.to_string())),
        None => properties,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paydesk_core::domain::QueueTopology;

    #[test]
    fn test_plain_queue_has_no_arguments() {
        assert!(queue_arguments(&QueueSpec::durable()).inner().is_empty());
    }

    #[test]
    fn test_dead_letter_arguments() {
        let topology = QueueTopology::email_dispatch();
        let args = queue_arguments(&topology.primary_spec());
        let inner = args.inner();

        assert_eq!(inner.len(), 2);
        assert_eq!(
            inner.get(&ShortString::from(DEAD_LETTER_EXCHANGE_ARG)),
            Some(&AMQPValue::LongString(LongString::from("email.send.dlx")))
        );
        assert_eq!(
            inner.get(&ShortString::from(DEAD_LETTER_ROUTING_KEY_ARG)),
            Some(&AMQPValue::LongString(LongString::from("email.send.dead")))
        );
    }

    #[test]
    fn test_retry_queue_dead_letters_through_default_exchange() {
        let (_, spec) = QueueTopology::email_dispatch().retry_spec().unwrap();
        let args = queue_arguments(&spec);
        assert_eq!(
            args.inner().get(&ShortString::from(DEAD_LETTER_EXCHANGE_ARG)),
            Some(&AMQPValue::LongString(LongString::from("")))
        );
    }

    #[test]
    fn test_publish_properties() {
        let plain = publish_properties(&PublishOptions::default());
        assert_eq!(plain.delivery_mode(), &Some(2));
        assert_eq!(plain.expiration(), &None);

        let expiring = publish_properties(&PublishOptions::expiring_after(20_000));
        assert_eq!(
            expiring.expiration(),
            &Some(ShortString::from("20000"))
        );
    }
}
