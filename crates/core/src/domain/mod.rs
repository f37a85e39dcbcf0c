// Domain Layer - Pure business logic and entities

pub mod audit;
pub mod error;
pub mod job;
pub mod money;
pub mod payroll;
pub mod queue;
pub mod status;

// Re-exports
pub use audit::{AuditAction, AuditEntry};
pub use error::DomainError;
pub use job::{EmailJob, GeneratePayrollJob};
pub use money::Money;
pub use payroll::{Employee, EmployeePayrollLine, PayType, Payroll, PayrollTotals};
pub use queue::{QueueSpec, QueueTopology};
pub use status::{validate_transition, PayrollStatus};
