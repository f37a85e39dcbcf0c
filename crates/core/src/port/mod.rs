// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod email_sender;
pub mod id_provider; // For deterministic testing
pub mod payroll_store;
pub mod publisher;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, ChannelEvent,
    ChannelEventKind, ChannelEventSink, ConnectionEvent, ConnectionEventKind,
    BrokerResult, ConnectionEventSink, Delivery, DeliveryStream, PublishOptions,
};
pub use email_sender::{EmailError, EmailSender};
pub use id_provider::IdProvider;
pub use payroll_store::{PayrollStore, PayrollTransaction};
pub use publisher::{publish_json, JobPublisher};
pub use time_provider::TimeProvider;
pub use transaction::Transaction;
