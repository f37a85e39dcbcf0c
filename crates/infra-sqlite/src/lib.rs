// Paydesk Infrastructure - SQLite Adapter
// Implements: PayrollStore, PayrollTransaction

mod connection;
mod migration;
mod payroll_store;
mod transaction;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use payroll_store::SqlitePayrollStore;
pub use transaction::SqlitePayrollTransaction;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
