//! Canonical critique model — severities, claim nodes, and agent-tagged trees.

use serde::{Deserialize, Serialize};

/// Identifier for a critique agent (stable across retries).
pub type AgentId = String;

/// Index path from a tree root down to a node.
///
/// The first element selects a root, each subsequent element a child.
pub type NodePath = Vec<usize>;

/// Severity of a critique claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Minor issue, cosmetic or stylistic.
    Low,
    /// Worth addressing but not undermining the work.
    Medium,
    /// Materially weakens the work.
    High,
    /// Invalidates a central claim.
    Critical,
}

impl Severity {
    /// Fixed ascending rank (Low < Medium < High < Critical).
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// All severities in ascending order.
    pub fn all() -> &'static [Severity] {
        &[Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Error for unrecognized severity strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSeverity(pub String);

impl std::fmt::Display for UnknownSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown severity: {:?}", self.0)
    }
}

impl std::error::Error for UnknownSeverity {}

impl std::str::FromStr for Severity {
    type Err = UnknownSeverity;

    /// Case-insensitive match against the fixed enum. Anything else is
    /// rejected — severities are never free-form strings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

/// Terminal completion status of one agent's dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    /// Agent returned a tree that passed validation.
    Succeeded,
    /// Per-agent or stage deadline elapsed before a response arrived.
    TimedOut,
    /// Transport-level failure after retry exhaustion.
    TransportFailed,
    /// Output failed structural validation after retry exhaustion.
    Malformed,
    /// Agent never ran to completion (cancellation).
    Skipped,
}

impl AgentOutcome {
    /// Whether this outcome carries a usable tree.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::TransportFailed => write!(f, "transport_failed"),
            Self::Malformed => write!(f, "malformed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A single validated claim node.
///
/// Confidence is clamped into [0.0, 1.0] at every construction and
/// mutation point; children form a strict tree in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueNode {
    /// The claim being made about the content.
    pub claim: String,
    /// Supporting evidence cited by the agent.
    pub evidence: String,
    /// Agent confidence in the claim, always within [0.0, 1.0].
    pub confidence: f64,
    /// Severity of the issue.
    pub severity: Severity,
    /// Suggested remediation.
    pub recommendation: String,
    /// Counter-argument the agent concedes, if any.
    pub concession: Option<String>,
    /// Ordered sub-claims.
    pub children: Vec<CritiqueNode>,
    /// Declaration-order index among siblings in the raw output.
    pub index: usize,
    /// Arbitration comments appended to this node, in arrival order.
    pub arbitration_notes: Vec<String>,
}

impl CritiqueNode {
    /// Create a leaf node. Confidence outside [0, 1] is clamped.
    pub fn new(
        claim: &str,
        evidence: &str,
        confidence: f64,
        severity: Severity,
        recommendation: &str,
    ) -> Self {
        Self {
            claim: claim.to_string(),
            evidence: evidence.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            severity,
            recommendation: recommendation.to_string(),
            concession: None,
            children: Vec::new(),
            index: 0,
            arbitration_notes: Vec::new(),
        }
    }

    /// Set the concession text.
    pub fn with_concession(mut self, concession: &str) -> Self {
        self.concession = Some(concession.to_string());
        self
    }

    /// Attach ordered sub-claims, fixing up their sibling indices.
    pub fn with_children(mut self, children: Vec<CritiqueNode>) -> Self {
        self.children = children;
        for (i, child) in self.children.iter_mut().enumerate() {
            child.index = i;
        }
        self
    }

    /// Overwrite confidence, clamping into range.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    /// Nodes in this subtree, including self.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_size()).sum::<usize>()
    }

    /// Depth of this subtree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }
}

/// The normalized output of one agent: root claim nodes tagged with the
/// agent's identity and terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueTree {
    /// Which agent produced this tree.
    pub agent_id: AgentId,
    /// How the agent's dispatch terminated.
    pub outcome: AgentOutcome,
    /// Ordered root claims.
    pub roots: Vec<CritiqueNode>,
}

impl CritiqueTree {
    /// Create a successful tree, fixing up root indices.
    pub fn new(agent_id: &str, mut roots: Vec<CritiqueNode>) -> Self {
        for (i, root) in roots.iter_mut().enumerate() {
            root.index = i;
        }
        Self {
            agent_id: agent_id.to_string(),
            outcome: AgentOutcome::Succeeded,
            roots,
        }
    }

    /// Total node count across all roots.
    pub fn node_count(&self) -> usize {
        self.roots.iter().map(|r| r.subtree_size()).sum()
    }

    /// Maximum nesting depth across all roots.
    pub fn max_depth(&self) -> usize {
        self.roots.iter().map(|r| r.depth()).max().unwrap_or(0)
    }

    /// Resolve an index path to a node.
    pub fn node_at(&self, path: &[usize]) -> Option<&CritiqueNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.get(*first)?;
        for idx in rest {
            node = node.children.get(*idx)?;
        }
        Some(node)
    }

    /// Resolve an index path to a mutable node.
    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut CritiqueNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.get_mut(*first)?;
        for idx in rest {
            node = node.children.get_mut(*idx)?;
        }
        Some(node)
    }

    /// Visit every node in declaration order (depth-first).
    pub fn for_each_node<'a, F: FnMut(&'a CritiqueNode)>(&'a self, mut f: F) {
        fn walk<'a, F: FnMut(&'a CritiqueNode)>(node: &'a CritiqueNode, f: &mut F) {
            f(node);
            for child in &node.children {
                walk(child, f);
            }
        }
        for root in &self.roots {
            walk(root, &mut f);
        }
    }

    /// Flattened view of every node in the tree.
    pub fn nodes(&self) -> Vec<&CritiqueNode> {
        let mut out = Vec::with_capacity(self.node_count());
        self.for_each_node(|n| out.push(n));
        out
    }
}
