pub mod dispatcher;
pub mod executor;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod repo;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use dispatcher::Dispatcher;
pub use executor::{ExecError, Executor, JobExecutionOutcome};
pub use memory::MemoryJobStore;
pub use metrics::{PollerState, StatusSnapshot};
pub use model::{Job, JobStatus, NewJob, StatusCounts};
pub use repo::PgJobStore;
pub use retry::RetryDecision;
pub use scheduler::{Scheduler, TickOutcome};
pub use store::JobStore;
