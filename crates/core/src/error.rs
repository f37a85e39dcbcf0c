// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Broker error: {0}")]
    Broker(#[from] crate::port::BrokerError),

    #[error("Queueing failed: {0}")]
    Queue(String),

    #[error("Email delivery error: {0}")]
    Email(#[from] crate::port::EmailError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that another delivery of the same job cannot fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AppError::Domain(_)
                | AppError::Validation(_)
                | AppError::NotFound(_)
                | AppError::Serialization(_)
                | AppError::Config(_)
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String)
