//! Prompt construction for the critique, arbitration, and judge calls.
//!
//! Every prompt demands strict JSON output; the orchestration core
//! validates structure, so the prompts only need to make the expected
//! shape unambiguous.

use orchestration::{AgentKind, ArbitrationRequest, CritiqueRequest, JudgeRequest};

/// System prompt for one critique role.
pub fn critique_system_prompt(kind: AgentKind) -> String {
    let focus = match kind {
        AgentKind::Methodology => {
            "You scrutinize methods, study design, and logical structure. \
             Look for confounds, invalid inferences, missing controls, and \
             unjustified generalizations."
        }
        AgentKind::Evidence => {
            "You check every claim against the evidence actually presented. \
             Look for citations that do not support the claim, overstated \
             effect sizes, and conclusions beyond the data."
        }
        AgentKind::Clarity => {
            "You evaluate exposition, organization, and ambiguity. Look for \
             undefined terms, contradictory passages, and structure that \
             obscures the argument."
        }
        AgentKind::Adversary => {
            "You argue the strongest good-faith case against the content's \
             conclusions. Steelman the opposition and surface the alternative \
             explanations the authors have not ruled out."
        }
    };

    format!(
        r#"You are one reviewer on a critique panel. {focus}

Respond with JSON only: an array of critique objects. Each object has:
- "claim": string, the specific issue you identify
- "evidence": string, where in the content the issue appears
- "confidence": number between 0.0 and 1.0
- "severity": one of "low", "medium", "high", "critical"
- "recommendation": string, how to address the issue
- "concession": optional string, the best counter-argument to your claim
- "sub_claims": optional array of nested critique objects

Report only issues you can ground in the content. An empty array is a
valid response when you find nothing."#
    )
}

/// User prompt for one critique invocation.
pub fn critique_user_prompt(request: &CritiqueRequest) -> String {
    let context = request
        .context
        .as_deref()
        .unwrap_or("No additional context provided.");
    format!(
        "## Goal\n\n{}\n\n## Additional Context\n\n{}\n\n## Content Under Review\n\n{}",
        request.goal, context, request.content
    )
}

/// System prompt for the arbitration call.
pub fn arbitration_system_prompt() -> &'static str {
    r#"You are the arbiter for a critique panel. You receive every panelist's
critique tree and reconcile them: raise confidence where panelists
independently corroborate a finding, lower it where one panelist's
concession or counter-evidence undercuts another's claim, and adjust
severity where the panel's combined view warrants it.

You may only adjust existing nodes. Never invent or remove critiques.

Respond with JSON only: an array of adjustment objects. Each object has:
- "agent_id": string, which panelist's tree to adjust
- "path": array of integers, root-to-node index path into that tree
- "confidence": optional number between 0.0 and 1.0, the new confidence
- "severity": optional, one of "low", "medium", "high", "critical"
- "comment": string, why the adjustment is warranted

An empty array is a valid response when no reconciliation is needed."#
}

/// User prompt for the arbitration call.
pub fn arbitration_user_prompt(request: &ArbitrationRequest) -> String {
    let trees = serde_json::to_string_pretty(&request.trees)
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "## Goal\n\n{}\n\n## Panel Critique Trees\n\n```json\n{}\n```",
        request.goal, trees
    )
}

/// System prompt for the judge call.
pub fn judge_system_prompt() -> &'static str {
    r#"You are the judge for a critique panel. You receive the arbitrated
critique trees and synthesize one verdict on the content's overall
quality.

Weigh severity and confidence together: one high-confidence critical
finding outweighs many low-severity quibbles. Arbitration notes on a
node record the panel's reconciled view; prefer them over the original
framing.

Respond with JSON only, a single object with:
- "summary_text": string, a narrative synthesis of the panel's findings
- "overall_score": integer 0 to 100, where 0 is rejected and 100 is sound
- "score_justification": string, how the findings produced the score"#
}

/// User prompt for the judge call.
pub fn judge_user_prompt(request: &JudgeRequest) -> String {
    let trees = serde_json::to_string_pretty(&request.trees)
        .unwrap_or_else(|_| "{}".to_string());
    let arbitration_note = if request.arbitration.degraded {
        "Arbitration did not run; the trees are unreconciled.".to_string()
    } else {
        format!(
            "Arbitration applied {} adjustments ({} dropped).",
            request.arbitration.applied.len(),
            request.arbitration.dropped.len()
        )
    };
    format!(
        "## Goal\n\n{}\n\n## Arbitration\n\n{}\n\n## Critique Trees\n\n```json\n{}\n```",
        request.goal, arbitration_note, trees
    )
}
