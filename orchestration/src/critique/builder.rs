//! Critique tree builder — normalizes raw agent output into validated trees.
//!
//! Agents return recursively nested JSON. The builder enforces the node
//! schema (required fields, fixed severity enum, bounded depth) and
//! rejects anything else as malformed; the dispatcher's retry policy
//! consumes those rejections.

use serde_json::Value;

use super::node::{CritiqueNode, CritiqueTree, Severity};

/// Default maximum nesting depth for sub-claims.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Error type for tree construction.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("output is not a critique object or array")]
    NotStructured,

    #[error("output contains no critique nodes")]
    EmptyOutput,

    #[error("node is not an object")]
    NodeNotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown severity: {0:?}")]
    UnknownSeverity(String),

    #[error("nesting depth exceeds maximum of {0}")]
    TooDeep(usize),
}

/// Result type for tree construction.
pub type BuildResult<T> = Result<T, BuildError>;

/// Validates one agent's raw structured output into a `CritiqueTree`.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    max_depth: usize,
}

impl TreeBuilder {
    /// Create a builder with an explicit depth cap.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    /// Build and validate a tree from raw output.
    ///
    /// Accepted shapes: a single node object, an array of nodes, or an
    /// object with a `critiques` array. Node order mirrors the raw
    /// output exactly — never re-sorted.
    pub fn build(&self, agent_id: &str, raw: &Value) -> BuildResult<CritiqueTree> {
        let roots = self.parse_roots(raw)?;
        if roots.is_empty() {
            return Err(BuildError::EmptyOutput);
        }
        Ok(CritiqueTree::new(agent_id, roots))
    }

    fn parse_roots(&self, raw: &Value) -> BuildResult<Vec<CritiqueNode>> {
        match raw {
            Value::Array(items) => self.parse_node_list(items, 1),
            Value::Object(map) => {
                if let Some(Value::Array(items)) = map.get("critiques") {
                    self.parse_node_list(items, 1)
                } else if map.contains_key("claim") {
                    Ok(vec![self.parse_node(raw, 1, 0)?])
                } else {
                    Err(BuildError::NotStructured)
                }
            }
            _ => Err(BuildError::NotStructured),
        }
    }

    fn parse_node_list(&self, items: &[Value], depth: usize) -> BuildResult<Vec<CritiqueNode>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| self.parse_node(item, depth, i))
            .collect()
    }

    fn parse_node(&self, raw: &Value, depth: usize, index: usize) -> BuildResult<CritiqueNode> {
        if depth > self.max_depth {
            return Err(BuildError::TooDeep(self.max_depth));
        }
        let obj = raw.as_object().ok_or(BuildError::NodeNotAnObject)?;

        let claim = require_string(obj, "claim")?;
        let evidence = require_string(obj, "evidence")?;
        let recommendation = require_string(obj, "recommendation")?;

        // Out-of-range confidence is a minor format deviation: clamp it.
        let confidence = parse_confidence(obj.get("confidence"))?;

        let severity_raw = require_string(obj, "severity")?;
        let severity: Severity = severity_raw
            .parse()
            .map_err(|_| BuildError::UnknownSeverity(severity_raw.clone()))?;

        let concession = match obj.get("concession") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("none") => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(BuildError::InvalidField {
                    field: "concession",
                    reason: "expected a string or null".to_string(),
                })
            }
        };

        let children = match obj.get("sub_claims") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => self.parse_node_list(items, depth + 1)?,
            Some(_) => {
                return Err(BuildError::InvalidField {
                    field: "sub_claims",
                    reason: "expected an array".to_string(),
                })
            }
        };

        let mut node = CritiqueNode::new(&claim, &evidence, confidence, severity, &recommendation);
        node.concession = concession;
        node.index = index;
        Ok(node.with_children(children))
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

fn require_string(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> BuildResult<String> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(BuildError::InvalidField {
            field,
            reason: "expected a string".to_string(),
        }),
        None => Err(BuildError::MissingField(field)),
    }
}

fn parse_confidence(value: Option<&Value>) -> BuildResult<f64> {
    let value = value.ok_or(BuildError::MissingField("confidence"))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        // Numeric strings are tolerated the same way out-of-range
        // numbers are: a format deviation, not a structural error.
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(c) if c.is_finite() => Ok(c.clamp(0.0, 1.0)),
        _ => Err(BuildError::InvalidField {
            field: "confidence",
            reason: "expected a finite number".to_string(),
        }),
    }
}
