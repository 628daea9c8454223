//! Background jobs with retry, backoff and a dead-letter list.
//!
//! - [`Job`]: tenant-scoped unit of work with its retry policy and attempt history
//! - [`JobStore`]: queue and history of jobs
//! - [`JobExecutor`]: polls the store on its own thread and runs the handler registered for each job kind

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{DeadLetterEntry, Job, JobAttempt, JobId, JobKind, JobResult, JobStatus, RetryPolicy};
