// Application Layer - Job engine, handlers and producer services

pub mod broker;
pub mod email;
pub mod payroll;
pub mod retry;
pub mod worker;

// Re-exports
pub use broker::{Broker, BrokerConfig, ConnectionState};
pub use email::{EmailDispatchHandler, EmailService};
pub use payroll::{GeneratePayrollHandler, GenerationOutcome, PayrollService};
pub use retry::BackoffPolicy;
pub use worker::{shutdown_channel, HandlerOutcome, JobHandler, ShutdownSender, ShutdownToken};
