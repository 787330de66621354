//! Job persistence seam and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::state::{JobId, ResearchJob};

/// Errors from the job store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for job records.
///
/// Updates replace the whole record; the runner is the sole writer, so
/// the store needs no finer-grained merging.
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails on id collision.
    fn create(&self, job: ResearchJob) -> StoreResult<()>;

    /// Fetch a record by id.
    fn get(&self, id: &str) -> StoreResult<ResearchJob>;

    /// Replace an existing record.
    fn update(&self, job: ResearchJob) -> StoreResult<()>;

    /// All records, ordered by creation time.
    fn list(&self) -> StoreResult<Vec<ResearchJob>>;
}

/// Shared reference to a job store.
pub type SharedJobStore = Arc<dyn JobStore>;

/// HashMap-backed store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, ResearchJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedJobStore {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job: ResearchJob) -> StoreResult<()> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateJob(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<ResearchJob> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update(&self, job: ResearchJob) -> StoreResult<()> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<ResearchJob>> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut all: Vec<ResearchJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }
}
