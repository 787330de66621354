//! Cross-agent arbitration: reconcile the assembled critique trees by
//! applying targeted adjustments.
//!
//! Arbitration never invents or deletes critiques; it only tunes
//! confidence and severity on existing nodes and leaves a comment
//! trail. The stage is advisory: any failure degrades to a no-op pass
//! with the trees untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agents::{AgentError, ArbitrationRequest, ReasoningService};
use crate::critique::{AgentId, CritiqueTree, NodePath, Severity};
use crate::events::{EventSink, JobEvent};

/// One targeted adjustment to a node in some agent's tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationAdjustment {
    /// Which agent's tree to adjust.
    pub agent_id: AgentId,
    /// Root-to-node index path.
    pub path: NodePath,
    /// Replacement confidence, if any.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Replacement severity, if any.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Rationale, appended to the node's arbitration notes.
    pub comment: String,
}

/// Outcome of the arbitration stage, attached to the judge request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArbitrationReport {
    /// Adjustments applied to the trees.
    pub applied: Vec<ArbitrationAdjustment>,
    /// Adjustments dropped (bad target or out-of-range value).
    pub dropped: Vec<ArbitrationAdjustment>,
    /// True when the stage failed and the trees passed through as-is.
    pub degraded: bool,
}

impl ArbitrationReport {
    /// A pass-through report for a failed or skipped stage.
    pub fn degraded() -> Self {
        Self {
            applied: Vec::new(),
            dropped: Vec::new(),
            degraded: true,
        }
    }
}

/// Apply a batch of adjustments to the tree set.
///
/// Adjustments targeting a missing agent or node path, or carrying a
/// non-finite confidence, are dropped individually; the rest apply in
/// order. Confidence is clamped to [0, 1] on application.
pub fn apply_adjustments(
    trees: &mut BTreeMap<AgentId, CritiqueTree>,
    adjustments: Vec<ArbitrationAdjustment>,
) -> ArbitrationReport {
    let mut applied = Vec::new();
    let mut dropped = Vec::new();

    for adjustment in adjustments {
        if let Some(conf) = adjustment.confidence {
            if !conf.is_finite() {
                warn!(
                    agent_id = %adjustment.agent_id,
                    confidence = conf,
                    "dropping adjustment with non-finite confidence"
                );
                dropped.push(adjustment);
                continue;
            }
        }

        let node = trees
            .get_mut(&adjustment.agent_id)
            .and_then(|tree| tree.node_at_mut(&adjustment.path));
        let node = match node {
            Some(node) => node,
            None => {
                warn!(
                    agent_id = %adjustment.agent_id,
                    path = ?adjustment.path,
                    "dropping adjustment targeting unknown node"
                );
                dropped.push(adjustment);
                continue;
            }
        };

        if let Some(conf) = adjustment.confidence {
            node.set_confidence(conf);
        }
        if let Some(severity) = adjustment.severity {
            node.severity = severity;
        }
        if !adjustment.comment.is_empty() {
            node.arbitration_notes.push(adjustment.comment.clone());
        }
        applied.push(adjustment);
    }

    ArbitrationReport {
        applied,
        dropped,
        degraded: false,
    }
}

/// Parse the raw arbitration output into adjustments.
///
/// Accepts a bare array or an `{"adjustments": [...]}` envelope.
fn parse_adjustments(raw: &Value) -> Result<Vec<ArbitrationAdjustment>, AgentError> {
    let items = match raw {
        Value::Array(_) => raw.clone(),
        Value::Object(map) => match map.get("adjustments") {
            Some(list @ Value::Array(_)) => list.clone(),
            _ => {
                return Err(AgentError::Parse(
                    "expected an adjustment array or an 'adjustments' envelope".to_string(),
                ))
            }
        },
        _ => {
            return Err(AgentError::Parse(format!(
                "expected structured adjustments, got {raw}"
            )))
        }
    };
    serde_json::from_value(items).map_err(|e| AgentError::Parse(e.to_string()))
}

/// Runs the arbitration stage against the reasoning service.
pub struct ArbitrationEngine {
    service: Arc<dyn ReasoningService>,
    events: Arc<dyn EventSink>,
}

impl ArbitrationEngine {
    pub fn new(service: Arc<dyn ReasoningService>, events: Arc<dyn EventSink>) -> Self {
        Self { service, events }
    }

    /// Arbitrate the tree set in place. Never fails: a service error or
    /// unparseable output yields a degraded report and untouched trees.
    pub async fn arbitrate(
        &self,
        job_id: &str,
        goal: &str,
        trees: &mut BTreeMap<AgentId, CritiqueTree>,
    ) -> ArbitrationReport {
        let request = ArbitrationRequest {
            goal: goal.to_string(),
            trees: trees.clone(),
        };

        let report = match self.service.arbitrate(&request).await {
            Ok(raw) => match parse_adjustments(&raw) {
                Ok(adjustments) => {
                    debug!(job_id, count = adjustments.len(), "applying arbitration adjustments");
                    apply_adjustments(trees, adjustments)
                }
                Err(err) => {
                    warn!(job_id, error = %err, "arbitration output unusable, passing trees through");
                    ArbitrationReport::degraded()
                }
            },
            Err(err) => {
                warn!(job_id, error = %err, "arbitration call failed, passing trees through");
                ArbitrationReport::degraded()
            }
        };

        info!(
            job_id,
            applied = report.applied.len(),
            dropped = report.dropped.len(),
            degraded = report.degraded,
            "arbitration stage done"
        );
        self.events.publish(JobEvent::ArbitrationDone {
            job_id: job_id.to_string(),
            degraded: report.degraded,
            applied: report.applied.len(),
            dropped: report.dropped.len(),
            timestamp: Utc::now(),
        });

        report
    }
}
