//! Progress events emitted by the orchestration core.
//!
//! One event per stage transition; delivery is ordered within a job and
//! at-least-once. Fan-out to subscribers is the emitter collaborator's
//! concern, not the core's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::critique::{AgentId, AgentOutcome};
use crate::job::state::{JobId, JobStatus};
use crate::judge::JudgeVerdict;

/// Unique identifier for events.
pub type EventId = String;

/// All job progress events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// An agent reached a terminal state (success or failure).
    AgentCompleted {
        job_id: JobId,
        agent_id: AgentId,
        outcome: AgentOutcome,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// The dispatch stage closed.
    DispatchClosed {
        job_id: JobId,
        succeeded: Vec<AgentId>,
        skipped: Vec<AgentId>,
        timestamp: DateTime<Utc>,
    },

    /// Arbitration finished (possibly degraded).
    ArbitrationDone {
        job_id: JobId,
        degraded: bool,
        applied: usize,
        dropped: usize,
        timestamp: DateTime<Utc>,
    },

    /// The judge produced a verdict.
    JudgeDone {
        job_id: JobId,
        verdict: JudgeVerdict,
        timestamp: DateTime<Utc>,
    },

    /// Job status changed.
    JobStatusChanged {
        job_id: JobId,
        old: JobStatus,
        new: JobStatus,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::AgentCompleted { timestamp, .. } => *timestamp,
            JobEvent::DispatchClosed { timestamp, .. } => *timestamp,
            JobEvent::ArbitrationDone { timestamp, .. } => *timestamp,
            JobEvent::JudgeDone { timestamp, .. } => *timestamp,
            JobEvent::JobStatusChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::AgentCompleted { .. } => "agent.completed",
            JobEvent::DispatchClosed { .. } => "dispatch.closed",
            JobEvent::ArbitrationDone { .. } => "arbitration.done",
            JobEvent::JudgeDone { .. } => "judge.done",
            JobEvent::JobStatusChanged { .. } => "job.status_changed",
        }
    }

    /// The job this event belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::AgentCompleted { job_id, .. } => job_id,
            JobEvent::DispatchClosed { job_id, .. } => job_id,
            JobEvent::ArbitrationDone { job_id, .. } => job_id,
            JobEvent::JudgeDone { job_id, .. } => job_id,
            JobEvent::JobStatusChanged { job_id, .. } => job_id,
        }
    }

    /// Create a new unique event ID.
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}
