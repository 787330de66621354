//! Configuration for the orchestration core.
//!
//! Every tunable has a sane default; a TOML file can override any
//! subset. Per-job knobs are captured in [`JobConfig`], which a
//! submission may override field-by-field.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::critique::Severity;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Dispatch-stage defaults.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Judge-stage defaults.
    #[serde(default)]
    pub judge: JudgeConfig,

    /// Job-level limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file, merged over defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Per-job knob set derived from the configured defaults.
    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            max_concurrency: self.dispatch.max_concurrency,
            per_agent_timeout_ms: self.dispatch.per_agent_timeout_ms,
            max_retries: self.dispatch.max_retries,
            retry_backoff_ms: self.dispatch.retry_backoff_ms,
            min_successful_agents: self.dispatch.min_successful_agents,
            dispatch_deadline_ms: self.dispatch.deadline_ms,
            job_deadline_ms: self.limits.job_deadline_ms,
            cancel_grace_ms: self.limits.cancel_grace_ms,
            max_tree_depth: self.limits.max_tree_depth,
            judge_retries: self.judge.retries,
        }
    }
}

/// Dispatch-stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum concurrent agent invocations.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for a single agent invocation, in milliseconds.
    #[serde(default = "default_per_agent_timeout_ms")]
    pub per_agent_timeout_ms: u64,

    /// Retries per agent after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retries, in milliseconds (doubles per attempt).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Minimum successful agents for the stage to proceed.
    #[serde(default = "default_min_successful_agents")]
    pub min_successful_agents: usize,

    /// Deadline for the whole dispatch stage, in milliseconds.
    #[serde(default = "default_dispatch_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            per_agent_timeout_ms: default_per_agent_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            min_successful_agents: default_min_successful_agents(),
            deadline_ms: default_dispatch_deadline_ms(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

fn default_per_agent_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_min_successful_agents() -> usize {
    2
}

fn default_dispatch_deadline_ms() -> u64 {
    300_000
}

/// Judge-stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Retries for the synthesis call before the deterministic fallback.
    #[serde(default = "default_judge_retries")]
    pub retries: u32,

    /// Severity weights used by the fallback scorer.
    #[serde(default)]
    pub weights: SeverityWeights,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            retries: default_judge_retries(),
            weights: SeverityWeights::default(),
        }
    }
}

fn default_judge_retries() -> u32 {
    1
}

/// Job-level limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Deadline for the whole job, in milliseconds.
    #[serde(default = "default_job_deadline_ms")]
    pub job_deadline_ms: u64,

    /// Grace period for in-flight work to acknowledge cancellation.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Maximum critique nesting depth accepted from agents.
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            job_deadline_ms: default_job_deadline_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            max_tree_depth: default_max_tree_depth(),
        }
    }
}

fn default_job_deadline_ms() -> u64 {
    600_000
}

fn default_cancel_grace_ms() -> u64 {
    2_000
}

fn default_max_tree_depth() -> usize {
    8
}

/// Severity-to-weight mapping for the deterministic fallback scorer.
///
/// Weights must ascend Low < Medium < High < Critical; the defaults are
/// an even ascending scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityWeights {
    #[serde(default = "default_weight_low")]
    pub low: f64,
    #[serde(default = "default_weight_medium")]
    pub medium: f64,
    #[serde(default = "default_weight_high")]
    pub high: f64,
    #[serde(default = "default_weight_critical")]
    pub critical: f64,
}

impl SeverityWeights {
    /// Weight for a given severity.
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }

    /// The largest weight, used to normalize per-node contributions.
    pub fn max_weight(&self) -> f64 {
        self.critical.max(self.high).max(self.medium).max(self.low)
    }
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            low: default_weight_low(),
            medium: default_weight_medium(),
            high: default_weight_high(),
            critical: default_weight_critical(),
        }
    }
}

fn default_weight_low() -> f64 {
    0.25
}

fn default_weight_medium() -> f64 {
    0.5
}

fn default_weight_high() -> f64 {
    0.75
}

fn default_weight_critical() -> f64 {
    1.0
}

/// Runtime knobs for one job.
///
/// Copied onto the job record at submission so later config changes
/// never affect a job already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub max_concurrency: usize,
    pub per_agent_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub min_successful_agents: usize,
    pub dispatch_deadline_ms: u64,
    pub job_deadline_ms: u64,
    pub cancel_grace_ms: u64,
    pub max_tree_depth: usize,
    pub judge_retries: u32,
}

impl JobConfig {
    pub fn per_agent_timeout(&self) -> Duration {
        Duration::from_millis(self.per_agent_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn dispatch_deadline(&self) -> Duration {
        Duration::from_millis(self.dispatch_deadline_ms)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_millis(self.job_deadline_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        OrchestratorConfig::default().job_config()
    }
}
