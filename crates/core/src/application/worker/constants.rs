// Job engine constants (no magic values)
use std::time::Duration;

/// Reconnect attempts before the broker connection is declared failed
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// First reconnect delay (1s), doubled per attempt
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling (30s)
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound of the random jitter added to each reconnect delay
pub const DEFAULT_RECONNECT_JITTER: Duration = Duration::from_secs(1);

/// Prefetch / concurrent payroll generations
pub const DEFAULT_PAYROLL_CONCURRENCY: u16 = 2;

/// Prefetch / concurrent email sends
pub const DEFAULT_EMAIL_CONCURRENCY: u16 = 5;

/// Email attempts beyond the first before the job is dead-lettered
pub const MAX_EMAIL_RETRIES: u32 = 5;

/// Email retry delay: 5s, 10s, 20s, ... capped at 5 minutes
pub const EMAIL_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
pub const EMAIL_RETRY_MAX_DELAY: Duration = Duration::from_secs(5 * 60);

/// Sleep after a consumer subscription error before resubscribing (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// How long `Broker::close` waits for background tasks to wind down
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
