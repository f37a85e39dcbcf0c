// lapin error mapping

use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use paydesk_core::port::BrokerError;

/// Whether a lapin error is the broker rejecting inequivalent arguments
/// (reply code 406)
pub(crate) fn is_precondition_failed(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(amqp) => {
            amqp.kind() == &AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
        }
        _ => false,
    }
}

pub(crate) fn map_declare_error(name: &str, err: lapin::Error) -> BrokerError {
    if is_precondition_failed(&err) {
        BrokerError::TopologyMismatch {
            name: name.to_string(),
            message: err.to_string(),
        }
    } else {
        BrokerError::Declaration {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

pub(crate) fn map_channel_error(queue: &str, err: lapin::Error) -> BrokerError {
    BrokerError::Channel {
        queue: queue.to_string(),
        message: err.to_string(),
    }
}

pub(crate) fn map_connection_error(err: lapin::Error) -> BrokerError {
    BrokerError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::AMQPError;

    fn protocol_error(kind: AMQPErrorKind, message: &str) -> lapin::Error {
        lapin::Error::ProtocolError(AMQPError::new(kind, message.into()))
    }

    #[test]
    fn test_precondition_failed_maps_to_topology_mismatch() {
        let err = protocol_error(
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
            "PRECONDITION_FAILED - inequivalent arg 'x-dead-letter-exchange'",
        );
        assert!(is_precondition_failed(&err));
        assert!(matches!(
            map_declare_error("email.send", err),
            BrokerError::TopologyMismatch { name, .. } if name == "email.send"
        ));
    }

    #[test]
    fn test_other_protocol_errors_are_not_precondition_failures() {
        // the message alone does not decide
        let not_found = protocol_error(
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND),
            "NOT_FOUND - PRECONDITION_FAILED in queue name",
        );
        assert!(!is_precondition_failed(&not_found));
        assert!(matches!(
            map_declare_error("q", not_found),
            BrokerError::Declaration { .. }
        ));
    }

    #[test]
    fn test_declare_error_without_precondition() {
        let err = lapin::Error::InvalidChannelState(lapin::ChannelState::Closed);
        assert!(matches!(
            map_declare_error("q", err),
            BrokerError::Declaration { .. }
        ));
    }
}
