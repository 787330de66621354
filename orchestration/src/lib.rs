//! Multi-agent critique orchestration.
//!
//! This library drives a panel of critique agents against a piece of
//! content and condenses their findings into one scored verdict:
//! - Dispatch: bounded concurrent fan-out with timeout and retry per agent
//! - Tree building: raw agent output validated into critique trees
//! - Arbitration: cross-agent adjustments applied to the tree set
//! - Judgment: verdict synthesis with a deterministic fallback
//! - Jobs: a persisted state machine covering the whole lifecycle
//!
//! The reasoning service behind the agents is a trait seam
//! ([`ReasoningService`]); the core never talks to a model directly.

pub mod agents;
pub mod arbitration;
pub mod config;
pub mod critique;
pub mod dispatch;
pub mod events;
pub mod job;
pub mod judge;

// Re-export agent seam types
pub use agents::{
    AgentError, AgentKind, AgentResult, AgentSpec, ArbitrationRequest, CritiqueRequest,
    JudgeRequest, ReasoningService,
};

// Re-export critique model types
pub use critique::{
    AgentId, AgentOutcome, BuildError, CritiqueNode, CritiqueTree, NodePath, Severity, TreeBuilder,
};

// Re-export dispatch types
pub use dispatch::{AgentDispatcher, AgentReport, DispatchError, DispatchOutcome};

// Re-export arbitration types
pub use arbitration::{
    apply_adjustments, ArbitrationAdjustment, ArbitrationEngine, ArbitrationReport,
};

// Re-export judge types
pub use judge::{fallback_score, JudgeSynthesizer, JudgeVerdict, VerdictFlags};

// Re-export job lifecycle types
pub use job::{
    InMemoryJobStore, JobError, JobId, JobResult, JobRunner, JobStatus, JobStatusView, JobStore,
    JobSubmission, ResearchJob, SharedJobStore, StoreError, SubmitError, TransitionError,
};

// Re-export event types
pub use events::{EventBus, EventSink, JobEvent, SharedEventSink};

// Re-export configuration types
pub use config::{JobConfig, OrchestratorConfig, SeverityWeights};
