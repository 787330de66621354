//! Job records and the status state machine.
//!
//! Status transitions are validated against a fixed graph; terminal
//! states absorb repeats of themselves and reject everything else. The
//! runner is the only writer, so transitions here never race.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::agents::AgentSpec;
use crate::config::JobConfig;
use crate::critique::{AgentId, AgentOutcome, CritiqueTree};
use crate::judge::JudgeVerdict;

/// Identifier for review jobs.
pub type JobId = String;

/// Lifecycle status of a review job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet started.
    Pending,
    /// Pipeline in progress.
    Running,
    /// Finished with a verdict.
    Completed,
    /// Terminated without a verdict.
    Failed,
    /// Cancelled by request.
    Cancelled,
}

impl JobStatus {
    /// Statuses reachable from this one.
    pub fn valid_transitions(self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled, Self::Failed],
            Self::Running => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One recorded status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    /// Human-readable cause ("dispatch threshold missed", "cancelled by
    /// operator", ...).
    pub reason: Option<String>,
}

/// The verdict and the trees it was drawn from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub verdict: JudgeVerdict,
    pub trees: BTreeMap<AgentId, CritiqueTree>,
}

/// A review job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchJob {
    pub id: JobId,
    pub status: JobStatus,
    /// Who submitted the job, when the caller identifies itself.
    pub owner: Option<String>,
    /// The content under review.
    pub content: String,
    /// The goal or research question the content addresses.
    pub goal: String,
    /// Optional extra context for the panel.
    pub context: Option<String>,
    /// The agent panel this job dispatches to.
    pub agents: Vec<AgentSpec>,
    /// Knobs frozen at submission time.
    pub config: JobConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Terminal outcome per agent, filled in as dispatch closes.
    #[serde(default)]
    pub agent_outcomes: BTreeMap<AgentId, AgentOutcome>,
    /// Present once the job completes.
    #[serde(default)]
    pub result: Option<JobResult>,
    /// Present once the job fails.
    #[serde(default)]
    pub failure: Option<String>,
    /// Full transition history, oldest first.
    #[serde(default)]
    pub transitions: Vec<JobTransition>,
}

impl ResearchJob {
    pub fn new(
        id: &str,
        owner: Option<String>,
        content: &str,
        goal: &str,
        context: Option<String>,
        agents: Vec<AgentSpec>,
        config: JobConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            status: JobStatus::Pending,
            owner,
            content: content.to_string(),
            goal: goal.to_string(),
            context,
            agents,
            config,
            created_at: now,
            updated_at: now,
            agent_outcomes: BTreeMap::new(),
            result: None,
            failure: None,
            transitions: Vec::new(),
        }
    }

    /// Move the job to a new status.
    ///
    /// Re-entering the current terminal status is an idempotent no-op;
    /// any other move out of a terminal status, or off the transition
    /// graph, is rejected.
    pub fn transition(&mut self, to: JobStatus, reason: Option<String>) -> Result<(), TransitionError> {
        if self.status == to && self.status.is_terminal() {
            return Ok(());
        }
        if !self.status.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        debug!(job_id = %self.id, from = %self.status, to = %to, "job transition");
        self.transitions.push(JobTransition {
            from: self.status,
            to,
            timestamp: now,
            reason,
        });
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}
