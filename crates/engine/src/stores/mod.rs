//! Process-wide shared state: staged client data and in-flight executions.
//! Both are ephemeral; nothing here survives a restart.

pub mod pending;
pub mod staging;

pub use pending::{PendingExecution, PendingExecutions};
pub use staging::{ImageRef, StagedType, StagedValue, StagingError, StagingStore};
