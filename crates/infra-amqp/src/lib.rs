// Paydesk Infrastructure - AMQP Adapter
// Implements: BrokerConnector, BrokerConnection, BrokerChannel, Delivery

mod arguments;
mod channel;
mod connection;
mod error;

pub use channel::LapinChannel;
pub use connection::{LapinConnection, LapinConnector};

// Note: lapin::Error conversion is handled by helper functions in `error`
// due to Rust's orphan rules (cannot implement From<lapin::Error> for BrokerError here)
