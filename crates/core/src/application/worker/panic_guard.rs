// Panic isolation for handler execution
use std::any::Any;
use std::future::Future;
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed successfully
    Success(T),
    /// Execution panicked
    Panicked(String),
}

/// Run a future on its own task so that a panic inside a job handler
/// surfaces as `PanicGuardResult::Panicked` instead of killing the consumer.
pub async fn execute_guarded_async<F, T>(future: F) -> PanicGuardResult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(value) => PanicGuardResult::Success(value),
        Err(join_err) if join_err.is_panic() => {
            let panic_msg = panic_message(join_err.into_panic());
            error!(panic_msg = %panic_msg, "Job handler panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
        Err(join_err) => {
            // Only reachable when the runtime is shutting down
            error!(error = %join_err, "Job handler task was cancelled");
            PanicGuardResult::Panicked(join_err.to_string())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
