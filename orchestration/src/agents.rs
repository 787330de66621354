//! The reasoning-service seam: agent roles, request types, and the
//! `ReasoningService` trait the core depends on.
//!
//! The textual content of any agent's reasoning is opaque to the core;
//! a service implementation returns raw structured JSON which the tree
//! builder (or the arbitration/judge parsers) validate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::arbitration::ArbitrationReport;
use crate::critique::{AgentId, CritiqueTree};

/// Errors from a reasoning-service invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

/// Result type for reasoning-service calls.
pub type AgentResult<T> = Result<T, AgentError>;

/// Fixed critique roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Scrutinizes methods, study design, and logical structure.
    Methodology,
    /// Checks claims against the evidence actually presented.
    Evidence,
    /// Evaluates exposition, organization, and ambiguity.
    Clarity,
    /// Argues the strongest case against the content's conclusions.
    Adversary,
}

impl AgentKind {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Methodology => "Methods, study design, and logical structure",
            Self::Evidence => "Claim-by-claim check against presented evidence",
            Self::Clarity => "Exposition, organization, and ambiguity",
            Self::Adversary => "Strongest counter-case against the conclusions",
        }
    }

    /// All roles in their canonical order.
    pub fn all() -> &'static [AgentKind] {
        &[
            Self::Methodology,
            Self::Evidence,
            Self::Clarity,
            Self::Adversary,
        ]
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Methodology => write!(f, "methodology"),
            Self::Evidence => write!(f, "evidence"),
            Self::Clarity => write!(f, "clarity"),
            Self::Adversary => write!(f, "adversary"),
        }
    }
}

/// One configured critique agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Stable identity, unique within a job.
    pub id: AgentId,
    /// Critique role.
    pub kind: AgentKind,
}

impl AgentSpec {
    pub fn new(id: &str, kind: AgentKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
        }
    }

    /// One spec per role, ids matching the role names.
    pub fn default_panel() -> Vec<AgentSpec> {
        AgentKind::all()
            .iter()
            .map(|kind| AgentSpec::new(&kind.to_string(), *kind))
            .collect()
    }
}

/// Request for one critique-agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueRequest {
    /// The content under evaluation.
    pub content: String,
    /// The goal or research question the content addresses.
    pub goal: String,
    /// Optional additional context supplied at submission.
    pub context: Option<String>,
}

/// Request for the arbitration call: the assembled tree set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub goal: String,
    pub trees: BTreeMap<AgentId, CritiqueTree>,
}

/// Request for the judge call: trees plus arbitration metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub goal: String,
    pub trees: BTreeMap<AgentId, CritiqueTree>,
    pub arbitration: ArbitrationReport,
}

/// The reasoning-service collaborator.
///
/// Implementations are stateless request/response clients; each method
/// is a single outbound call returning raw structured output. Timeouts
/// and retries are the caller's concern.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Invoke one critique agent against the content.
    async fn critique(
        &self,
        agent: &AgentSpec,
        request: &CritiqueRequest,
    ) -> AgentResult<serde_json::Value>;

    /// Produce arbitration adjustments for the assembled tree set.
    async fn arbitrate(&self, request: &ArbitrationRequest) -> AgentResult<serde_json::Value>;

    /// Produce the final verdict synthesis.
    async fn judge(&self, request: &JudgeRequest) -> AgentResult<serde_json::Value>;
}
