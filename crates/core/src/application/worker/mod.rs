// Worker - handler contract and execution helpers

pub mod constants;
mod panic_guard;
mod shutdown;

pub use panic_guard::{execute_guarded_async, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::error::AppError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

/// What a handler reports back; drives acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Acknowledge
    Success,
    /// Reject without requeue (dead-letter)
    PermanentFailure(String),
    /// May succeed on another delivery
    TransientFailure(String),
}

impl HandlerOutcome {
    /// Classify an error by whether retrying could help
    pub fn from_error(err: &AppError) -> Self {
        if err.is_permanent() {
            HandlerOutcome::PermanentFailure(err.to_string())
        } else {
            HandlerOutcome::TransientFailure(err.to_string())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success)
    }
}

/// A typed job handler bound to one queue
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Job: DeserializeOwned + Send + 'static;

    /// Used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, job: Self::Job) -> HandlerOutcome;
}

/// Object-safe form of a handler: raw payload in, outcome out
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle_payload(&self, payload: Vec<u8>) -> HandlerOutcome;
}

/// Decodes the JSON payload before calling the typed handler. A payload
/// that does not decode never reaches the handler.
pub struct JsonDeliveryHandler<H> {
    handler: Arc<H>,
}

impl<H: JobHandler> JsonDeliveryHandler<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: JobHandler> DeliveryHandler for JsonDeliveryHandler<H> {
    fn name(&self) -> &'static str {
        self.handler.name()
    }

    async fn handle_payload(&self, payload: Vec<u8>) -> HandlerOutcome {
        match serde_json::from_slice::<H::Job>(&payload) {
            Ok(job) => self.handler.handle(job).await,
            Err(e) => {
                warn!(
                    handler = self.handler.name(),
                    error = %e,
                    "Malformed job payload"
                );
                HandlerOutcome::PermanentFailure(format!("malformed payload: {}", e))
            }
        }
    }
}
