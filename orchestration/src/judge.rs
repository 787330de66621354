//! Verdict synthesis: the judge stage condenses the arbitrated trees
//! into a single scored verdict.
//!
//! The stage never fails a job. If the reasoning service cannot produce
//! usable output within the retry budget, a deterministic fallback
//! scores the trees from severity weights and confidence alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agents::{AgentError, JudgeRequest, ReasoningService};
use crate::arbitration::ArbitrationReport;
use crate::config::SeverityWeights;
use crate::critique::{AgentId, CritiqueTree};
use crate::events::{EventSink, JobEvent};

/// Caveats attached to a verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictFlags {
    /// The verdict came from the deterministic fallback scorer.
    #[serde(default)]
    pub degraded: bool,
    /// Arbitration did not run over these trees.
    #[serde(default)]
    pub unarbitrated: bool,
    /// Agents whose critiques are missing from the verdict.
    #[serde(default)]
    pub agents_skipped: Vec<AgentId>,
}

/// The final output of a review job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Narrative synthesis of the panel's findings.
    pub summary: String,
    /// Overall quality score, 0 (reject) to 100 (sound).
    pub score: u8,
    /// How the score was reached.
    pub justification: String,
    /// Caveats a consumer must surface alongside the verdict.
    pub flags: VerdictFlags,
}

/// Parse the judge's raw output into a verdict body.
///
/// Requires `summary_text`, `overall_score`, and `score_justification`;
/// the score is clamped to [0, 100].
fn parse_verdict(raw: &Value) -> Result<(String, u8, String), AgentError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| AgentError::Parse(format!("expected a verdict object, got {raw}")))?;

    let summary = obj
        .get("summary_text")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::Parse("missing 'summary_text'".to_string()))?;
    let justification = obj
        .get("score_justification")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::Parse("missing 'score_justification'".to_string()))?;
    let score = obj
        .get("overall_score")
        .and_then(Value::as_f64)
        .ok_or_else(|| AgentError::Parse("missing or non-numeric 'overall_score'".to_string()))?;
    if !score.is_finite() {
        return Err(AgentError::Parse("non-finite 'overall_score'".to_string()));
    }

    let score = score.round().clamp(0.0, 100.0) as u8;
    Ok((summary.to_string(), score, justification.to_string()))
}

/// Deterministic score from severity weights and confidence.
///
/// Each node contributes `weight(severity) * confidence`, normalized by
/// the maximum weight; the score is 100 minus the average penalty. An
/// empty tree set scores 100.
pub fn fallback_score(trees: &BTreeMap<AgentId, CritiqueTree>, weights: &SeverityWeights) -> u8 {
    let max_weight = weights.max_weight();
    if max_weight <= 0.0 {
        return 100;
    }

    let mut total_penalty = 0.0;
    let mut nodes = 0usize;
    for tree in trees.values() {
        tree.for_each_node(|node| {
            total_penalty += weights.weight(node.severity) * node.confidence / max_weight;
            nodes += 1;
        });
    }

    if nodes == 0 {
        return 100;
    }
    let penalty = total_penalty / nodes as f64;
    ((1.0 - penalty) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Runs the judge stage.
pub struct JudgeSynthesizer {
    service: Arc<dyn ReasoningService>,
    events: Arc<dyn EventSink>,
    weights: SeverityWeights,
}

impl JudgeSynthesizer {
    pub fn new(service: Arc<dyn ReasoningService>, events: Arc<dyn EventSink>) -> Self {
        Self {
            service,
            events,
            weights: SeverityWeights::default(),
        }
    }

    /// Override the fallback scorer's severity weights.
    pub fn with_weights(mut self, weights: SeverityWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Synthesize the verdict. Infallible: falls back to the
    /// deterministic scorer once the retry budget is spent.
    pub async fn synthesize(
        &self,
        job_id: &str,
        goal: &str,
        trees: &BTreeMap<AgentId, CritiqueTree>,
        arbitration: &ArbitrationReport,
        agents_skipped: Vec<AgentId>,
        retries: u32,
    ) -> JudgeVerdict {
        let flags = VerdictFlags {
            degraded: false,
            unarbitrated: arbitration.degraded,
            agents_skipped,
        };

        let request = JudgeRequest {
            goal: goal.to_string(),
            trees: trees.clone(),
            arbitration: arbitration.clone(),
        };

        let max_attempts = retries + 1;
        for attempt in 1..=max_attempts {
            match self.service.judge(&request).await {
                Ok(raw) => match parse_verdict(&raw) {
                    Ok((summary, score, justification)) => {
                        debug!(job_id, score, attempt, "judge produced a verdict");
                        let verdict = JudgeVerdict {
                            summary,
                            score,
                            justification,
                            flags,
                        };
                        self.emit(job_id, &verdict);
                        return verdict;
                    }
                    Err(err) => {
                        warn!(job_id, attempt, error = %err, "judge output unusable");
                    }
                },
                Err(err) => {
                    warn!(job_id, attempt, error = %err, "judge call failed");
                }
            }
        }

        let verdict = self.fallback(job_id, trees, flags);
        self.emit(job_id, &verdict);
        verdict
    }

    fn fallback(
        &self,
        job_id: &str,
        trees: &BTreeMap<AgentId, CritiqueTree>,
        mut flags: VerdictFlags,
    ) -> JudgeVerdict {
        let score = fallback_score(trees, &self.weights);
        let nodes: usize = trees.values().map(CritiqueTree::node_count).sum();
        info!(job_id, score, nodes, "judge degraded to deterministic scoring");
        flags.degraded = true;
        JudgeVerdict {
            summary: format!(
                "Synthesis unavailable; score derived from {} critique nodes across {} agent trees.",
                nodes,
                trees.len()
            ),
            score,
            justification:
                "Deterministic aggregate of per-node severity weight times confidence.".to_string(),
            flags,
        }
    }

    fn emit(&self, job_id: &str, verdict: &JudgeVerdict) {
        self.events.publish(JobEvent::JudgeDone {
            job_id: job_id.to_string(),
            verdict: verdict.clone(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentResult, AgentSpec, ArbitrationRequest, CritiqueRequest};
    use crate::critique::{CritiqueNode, Severity};
    use crate::events::EventBus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tree_with(nodes: Vec<(f64, Severity)>) -> CritiqueTree {
        let roots = nodes
            .into_iter()
            .map(|(conf, sev)| CritiqueNode::new("claim", "evidence", conf, sev, "rec"))
            .collect();
        CritiqueTree::new("agent", roots)
    }

    fn tree_set(trees: Vec<(&str, CritiqueTree)>) -> BTreeMap<AgentId, CritiqueTree> {
        trees.into_iter().map(|(id, t)| (id.to_string(), t)).collect()
    }

    #[test]
    fn test_parse_verdict_ok() {
        let raw = json!({
            "summary_text": "Largely sound with two evidentiary gaps.",
            "overall_score": 71,
            "score_justification": "Gaps are material but repairable."
        });
        let (summary, score, justification) = parse_verdict(&raw).unwrap();
        assert!(summary.starts_with("Largely sound"));
        assert_eq!(score, 71);
        assert!(!justification.is_empty());
    }

    #[test]
    fn test_parse_verdict_clamps_score() {
        let raw = json!({
            "summary_text": "s",
            "overall_score": 250,
            "score_justification": "j"
        });
        assert_eq!(parse_verdict(&raw).unwrap().1, 100);

        let raw = json!({
            "summary_text": "s",
            "overall_score": -3,
            "score_justification": "j"
        });
        assert_eq!(parse_verdict(&raw).unwrap().1, 0);
    }

    #[test]
    fn test_parse_verdict_missing_fields() {
        assert!(parse_verdict(&json!({"overall_score": 50})).is_err());
        assert!(parse_verdict(&json!("prose")).is_err());
        assert!(parse_verdict(&json!({
            "summary_text": "s",
            "overall_score": "high",
            "score_justification": "j"
        }))
        .is_err());
    }

    #[test]
    fn test_fallback_score_empty_trees() {
        let trees = BTreeMap::new();
        assert_eq!(fallback_score(&trees, &SeverityWeights::default()), 100);
    }

    #[test]
    fn test_fallback_score_severe_findings_score_low() {
        let weights = SeverityWeights::default();
        let mild = tree_set(vec![("a", tree_with(vec![(0.3, Severity::Low)]))]);
        let harsh = tree_set(vec![("a", tree_with(vec![(1.0, Severity::Critical)]))]);

        let mild_score = fallback_score(&mild, &weights);
        let harsh_score = fallback_score(&harsh, &weights);
        assert!(mild_score > harsh_score);
        assert_eq!(harsh_score, 0);
        // low weight 0.25 * 0.3 confidence = 0.075 penalty; 92.5 rounds
        // half away from zero.
        assert_eq!(mild_score, 93);
    }

    #[test]
    fn test_fallback_score_walks_nested_children() {
        let weights = SeverityWeights::default();
        let child = CritiqueNode::new("sub", "ev", 1.0, Severity::Critical, "rec");
        let root = CritiqueNode::new("root", "ev", 0.0, Severity::Low, "rec")
            .with_children(vec![child]);
        let trees = tree_set(vec![("a", CritiqueTree::new("a", vec![root]))]);
        // Node penalties 0.0 and 1.0 average to 0.5.
        assert_eq!(fallback_score(&trees, &weights), 50);
    }

    #[test]
    fn test_fallback_score_in_range() {
        let weights = SeverityWeights::default();
        let trees = tree_set(vec![
            ("a", tree_with(vec![(0.9, Severity::High), (0.2, Severity::Low)])),
            ("b", tree_with(vec![(0.5, Severity::Medium)])),
        ]);
        let score = fallback_score(&trees, &weights);
        assert!(score <= 100);
    }

    struct SequencedJudge {
        responses: Vec<AgentResult<Value>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReasoningService for SequencedJudge {
        async fn critique(
            &self,
            _agent: &AgentSpec,
            _request: &CritiqueRequest,
        ) -> AgentResult<Value> {
            Ok(json!({}))
        }

        async fn arbitrate(&self, _request: &ArbitrationRequest) -> AgentResult<Value> {
            Ok(json!([]))
        }

        async fn judge(&self, _request: &JudgeRequest) -> AgentResult<Value> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.responses
                .get(idx)
                .cloned()
                .unwrap_or_else(|| Err(AgentError::Unavailable("exhausted".to_string())))
        }
    }

    fn synthesizer(responses: Vec<AgentResult<Value>>) -> (JudgeSynthesizer, Arc<SequencedJudge>) {
        let service = Arc::new(SequencedJudge {
            responses,
            calls: AtomicU32::new(0),
        });
        (
            JudgeSynthesizer::new(service.clone(), EventBus::new().shared()),
            service,
        )
    }

    #[tokio::test]
    async fn test_synthesize_happy_path() {
        let (judge, _) = synthesizer(vec![Ok(json!({
            "summary_text": "Solid work.",
            "overall_score": 84,
            "score_justification": "Minor clarity issues only."
        }))]);
        let trees = tree_set(vec![("a", tree_with(vec![(0.5, Severity::Low)]))]);

        let verdict = judge
            .synthesize("job-1", "goal", &trees, &ArbitrationReport::default(), vec![], 1)
            .await;

        assert_eq!(verdict.score, 84);
        assert!(!verdict.flags.degraded);
        assert!(!verdict.flags.unarbitrated);
    }

    #[tokio::test]
    async fn test_synthesize_retries_then_succeeds() {
        let (judge, service) = synthesizer(vec![
            Err(AgentError::Transport("reset".to_string())),
            Ok(json!({
                "summary_text": "Recovered.",
                "overall_score": 60,
                "score_justification": "j"
            })),
        ]);
        let trees = tree_set(vec![("a", tree_with(vec![(0.5, Severity::Low)]))]);

        let verdict = judge
            .synthesize("job-1", "goal", &trees, &ArbitrationReport::default(), vec![], 1)
            .await;

        assert_eq!(verdict.score, 60);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert!(!verdict.flags.degraded);
    }

    #[tokio::test]
    async fn test_synthesize_falls_back_after_retries() {
        let (judge, service) = synthesizer(vec![
            Err(AgentError::Transport("reset".to_string())),
            Ok(json!("not a verdict")),
        ]);
        let trees = tree_set(vec![("a", tree_with(vec![(1.0, Severity::Critical)]))]);

        let verdict = judge
            .synthesize("job-1", "goal", &trees, &ArbitrationReport::default(), vec![], 1)
            .await;

        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert!(verdict.flags.degraded);
        assert_eq!(verdict.score, 0);
        assert!(verdict.summary.contains("Synthesis unavailable"));
    }

    #[tokio::test]
    async fn test_flags_carry_arbitration_and_skips() {
        let (judge, _) = synthesizer(vec![Ok(json!({
            "summary_text": "s",
            "overall_score": 50,
            "score_justification": "j"
        }))]);
        let trees = tree_set(vec![("a", tree_with(vec![(0.5, Severity::Low)]))]);

        let verdict = judge
            .synthesize(
                "job-1",
                "goal",
                &trees,
                &ArbitrationReport::degraded(),
                vec!["adversary".to_string()],
                0,
            )
            .await;

        assert!(verdict.flags.unarbitrated);
        assert_eq!(verdict.flags.agents_skipped, vec!["adversary".to_string()]);
        assert!(!verdict.flags.degraded);
    }
}
