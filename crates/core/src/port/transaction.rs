// Transaction port for atomic operations

use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}
