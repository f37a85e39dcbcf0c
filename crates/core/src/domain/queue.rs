// Queue Topology
//
// Every primary queue is paired with a dead-letter exchange/queue so that
// permanently failed messages are kept for inspection.

pub const PAYROLL_QUEUE: &str = "payroll.generate";
pub const PAYROLL_DEAD_LETTER_EXCHANGE: &str = "payroll.generate.dlx";
pub const PAYROLL_DEAD_LETTER_QUEUE: &str = "payroll.generate.dlq";
pub const PAYROLL_DEAD_LETTER_ROUTING_KEY: &str = "payroll.generate.dead";

pub const EMAIL_QUEUE: &str = "email.send";
pub const EMAIL_DEAD_LETTER_EXCHANGE: &str = "email.send.dlx";
pub const EMAIL_DEAD_LETTER_QUEUE: &str = "email.send.dlq";
pub const EMAIL_DEAD_LETTER_ROUTING_KEY: &str = "email.send.dead";
pub const EMAIL_RETRY_QUEUE: &str = "email.send.retry";

/// Where a queue routes rejected or expired messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTarget {
    /// Empty string means the default exchange
    pub exchange: String,
    pub routing_key: String,
}

/// Declaration arguments of a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub durable: bool,
    pub dead_letter: Option<DeadLetterTarget>,
}

impl QueueSpec {
    pub fn durable() -> Self {
        Self {
            durable: true,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter = Some(DeadLetterTarget {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub queue_name: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue_name: String,
    pub dead_letter_routing_key: String,
    /// Delay queue whose expired messages flow back into `queue_name`
    pub retry_queue_name: Option<String>,
}

impl QueueTopology {
    pub fn payroll_generation() -> Self {
        Self {
            queue_name: PAYROLL_QUEUE.to_string(),
            dead_letter_exchange: PAYROLL_DEAD_LETTER_EXCHANGE.to_string(),
            dead_letter_queue_name: PAYROLL_DEAD_LETTER_QUEUE.to_string(),
            dead_letter_routing_key: PAYROLL_DEAD_LETTER_ROUTING_KEY.to_string(),
            retry_queue_name: None,
        }
    }

    pub fn email_dispatch() -> Self {
        Self {
            queue_name: EMAIL_QUEUE.to_string(),
            dead_letter_exchange: EMAIL_DEAD_LETTER_EXCHANGE.to_string(),
            dead_letter_queue_name: EMAIL_DEAD_LETTER_QUEUE.to_string(),
            dead_letter_routing_key: EMAIL_DEAD_LETTER_ROUTING_KEY.to_string(),
            retry_queue_name: Some(EMAIL_RETRY_QUEUE.to_string()),
        }
    }

    /// Arguments for the primary queue
    pub fn primary_spec(&self) -> QueueSpec {
        QueueSpec::durable()
            .with_dead_letter(&self.dead_letter_exchange, &self.dead_letter_routing_key)
    }

    /// Arguments for the retry queue: dead-letter back to the primary queue
    /// through the default exchange
    pub fn retry_spec(&self) -> Option<(String, QueueSpec)> {
        self.retry_queue_name.as_ref().map(|name| {
            (
                name.clone(),
                QueueSpec::durable().with_dead_letter("", &self.queue_name),
            )
        })
    }
}
