//! Job lifecycle: records, persistence, and the pipeline runner.

pub mod runner;
pub mod state;
pub mod store;

pub use runner::{JobError, JobRunner, JobStatusView, JobSubmission, SubmitError};
pub use state::{JobId, JobResult, JobStatus, JobTransition, ResearchJob, TransitionError};
pub use store::{InMemoryJobStore, JobStore, SharedJobStore, StoreError, StoreResult};
