//! Agent pool dispatcher — bounded concurrent fan-out with per-agent
//! timeout, retry, and a stage deadline.
//!
//! Every agent reaches a terminal state (succeeded / timed-out /
//! transport-failed / malformed / skipped); individual failures are
//! absorbed and recorded, never propagated across the batch. The stage
//! only becomes fatal when the successful-agent count falls below the
//! configured threshold.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::agents::{AgentError, AgentSpec, CritiqueRequest, ReasoningService};
use crate::config::JobConfig;
use crate::critique::{AgentId, AgentOutcome, CritiqueTree, TreeBuilder};
use crate::events::{EventSink, JobEvent};

/// Error type for dispatch-stage failures.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("insufficient successful agents: {succeeded} succeeded, {required} required")]
    InsufficientAgents { succeeded: usize, required: usize },
}

/// Terminal record for one agent.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub spec: AgentSpec,
    pub outcome: AgentOutcome,
    /// Present only when `outcome` is `Succeeded`.
    pub tree: Option<CritiqueTree>,
    /// Invocations actually issued (bounded by `max_retries + 1`).
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl AgentReport {
    fn terminal(spec: AgentSpec, outcome: AgentOutcome, attempts: u32, error: Option<String>) -> Self {
        Self {
            spec,
            outcome,
            tree: None,
            attempts,
            last_error: error,
        }
    }
}

/// Everything the dispatch stage produced, keyed by agent identity so
/// ordering is deterministic regardless of completion order.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub reports: BTreeMap<AgentId, AgentReport>,
    /// Whether a cancellation signal closed the stage.
    pub cancelled: bool,
}

impl DispatchOutcome {
    /// Agent ids that produced a validated tree.
    pub fn succeeded(&self) -> Vec<AgentId> {
        self.reports
            .values()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.spec.id.clone())
            .collect()
    }

    /// Agent ids excluded from later stages.
    pub fn skipped(&self) -> Vec<AgentId> {
        self.reports
            .values()
            .filter(|r| !r.outcome.is_success())
            .map(|r| r.spec.id.clone())
            .collect()
    }

    /// Per-agent terminal outcomes.
    pub fn outcomes(&self) -> BTreeMap<AgentId, AgentOutcome> {
        self.reports
            .iter()
            .map(|(id, r)| (id.clone(), r.outcome))
            .collect()
    }

    /// The successful trees, consumed out of the reports.
    pub fn take_trees(&mut self) -> BTreeMap<AgentId, CritiqueTree> {
        self.reports
            .iter_mut()
            .filter_map(|(id, r)| r.tree.take().map(|t| (id.clone(), t)))
            .collect()
    }

    /// Fatal unless enough agents succeeded.
    pub fn ensure_threshold(&self, required: usize) -> Result<(), DispatchError> {
        let succeeded = self.succeeded().len();
        if succeeded < required {
            return Err(DispatchError::InsufficientAgents {
                succeeded,
                required,
            });
        }
        Ok(())
    }
}

/// Fans critique work out to the configured agents.
pub struct AgentDispatcher {
    service: Arc<dyn ReasoningService>,
    events: Arc<dyn EventSink>,
}

impl AgentDispatcher {
    pub fn new(service: Arc<dyn ReasoningService>, events: Arc<dyn EventSink>) -> Self {
        Self { service, events }
    }

    /// Run the dispatch stage for one job.
    ///
    /// Closes when every agent is terminal, when the dispatch deadline
    /// elapses (in-flight agents become `TimedOut`), or when the cancel
    /// signal fires (in-flight agents become `Skipped` after a grace
    /// period). Emits `agent.completed` per agent and one
    /// `dispatch.closed`.
    pub async fn dispatch(
        &self,
        job_id: &str,
        request: &CritiqueRequest,
        specs: &[AgentSpec],
        config: &JobConfig,
        cancel: watch::Receiver<bool>,
    ) -> DispatchOutcome {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let builder = TreeBuilder::new(config.max_tree_depth);

        let mut in_flight: FuturesUnordered<_> = specs
            .iter()
            .map(|spec| {
                self.run_agent(
                    spec.clone(),
                    request,
                    config,
                    &builder,
                    semaphore.clone(),
                    cancel.clone(),
                )
            })
            .collect();

        let mut reports: BTreeMap<AgentId, AgentReport> = BTreeMap::new();
        let mut cancelled = false;
        let mut deadline_hit = false;

        let deadline = tokio::time::sleep(config.dispatch_deadline());
        tokio::pin!(deadline);
        let mut cancel_watch = cancel.clone();

        loop {
            tokio::select! {
                maybe = in_flight.next() => match maybe {
                    Some(report) => self.record(job_id, &mut reports, report),
                    None => break,
                },
                _ = &mut deadline => {
                    deadline_hit = true;
                    break;
                }
                _ = wait_cancelled(&mut cancel_watch) => {
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            // Grace period: in-flight agents observe the signal and
            // return skipped reports; whatever doesn't make it in time
            // is skipped on their behalf.
            let grace = tokio::time::sleep(config.cancel_grace());
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    maybe = in_flight.next() => match maybe {
                        Some(report) => self.record(job_id, &mut reports, report),
                        None => break,
                    },
                    _ = &mut grace => break,
                }
            }
        }

        // Dropping the stream aborts anything still in flight.
        drop(in_flight);

        let late_outcome = if cancelled {
            AgentOutcome::Skipped
        } else {
            AgentOutcome::TimedOut
        };
        for spec in specs {
            if !reports.contains_key(&spec.id) {
                if deadline_hit {
                    warn!(job_id, agent_id = %spec.id, "agent still in flight at dispatch deadline");
                }
                self.record(
                    job_id,
                    &mut reports,
                    AgentReport::terminal(spec.clone(), late_outcome, 0, None),
                );
            }
        }

        let outcome = DispatchOutcome { reports, cancelled };
        let succeeded = outcome.succeeded();
        let skipped = outcome.skipped();
        info!(
            job_id,
            succeeded = succeeded.len(),
            skipped = skipped.len(),
            cancelled,
            "dispatch stage closed"
        );
        self.events.publish(JobEvent::DispatchClosed {
            job_id: job_id.to_string(),
            succeeded,
            skipped,
            timestamp: Utc::now(),
        });

        outcome
    }

    fn record(&self, job_id: &str, reports: &mut BTreeMap<AgentId, AgentReport>, report: AgentReport) {
        self.events.publish(JobEvent::AgentCompleted {
            job_id: job_id.to_string(),
            agent_id: report.spec.id.clone(),
            outcome: report.outcome,
            attempts: report.attempts,
            timestamp: Utc::now(),
        });
        reports.insert(report.spec.id.clone(), report);
    }

    /// Drive one agent to a terminal state: invoke, validate, retry.
    async fn run_agent(
        &self,
        spec: AgentSpec,
        request: &CritiqueRequest,
        config: &JobConfig,
        builder: &TreeBuilder,
        semaphore: Arc<Semaphore>,
        mut cancel: watch::Receiver<bool>,
    ) -> AgentReport {
        let _permit = tokio::select! {
            permit = semaphore.acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return AgentReport::terminal(spec, AgentOutcome::Skipped, 0, None),
            },
            _ = wait_cancelled(&mut cancel) => {
                return AgentReport::terminal(spec, AgentOutcome::Skipped, 0, None);
            }
        };

        let max_attempts = config.max_retries + 1;
        let mut attempts = 0u32;
        let mut last_outcome = AgentOutcome::TransportFailed;
        let mut last_error: Option<String> = None;
        // A rate-limited response dictates its own retry delay.
        let mut requested_backoff: Option<Duration> = None;

        while attempts < max_attempts {
            attempts += 1;

            let result = {
                let call = self.service.critique(&spec, request);
                tokio::select! {
                    res = timeout(config.per_agent_timeout(), call) => Some(res),
                    _ = wait_cancelled(&mut cancel) => None,
                }
            };
            let result = match result {
                Some(res) => res,
                None => return AgentReport::terminal(spec, AgentOutcome::Skipped, attempts, None),
            };

            match result {
                Err(_) => {
                    last_outcome = AgentOutcome::TimedOut;
                    last_error = Some(format!(
                        "no response within {}ms",
                        config.per_agent_timeout_ms
                    ));
                    debug!(agent_id = %spec.id, attempts, "agent invocation timed out");
                }
                Ok(Err(err)) => {
                    if let AgentError::RateLimited { retry_after_ms } = err {
                        requested_backoff = Some(Duration::from_millis(retry_after_ms));
                    }
                    last_outcome = AgentOutcome::TransportFailed;
                    last_error = Some(err.to_string());
                    debug!(agent_id = %spec.id, attempts, error = %err, "agent transport failure");
                }
                Ok(Ok(raw)) => match builder.build(&spec.id, &raw) {
                    Ok(tree) => {
                        debug!(agent_id = %spec.id, attempts, nodes = tree.node_count(), "agent succeeded");
                        return AgentReport {
                            spec,
                            outcome: AgentOutcome::Succeeded,
                            tree: Some(tree),
                            attempts,
                            last_error: None,
                        };
                    }
                    Err(err) => {
                        // Re-issue the request; the agent may produce
                        // conformant output on another attempt.
                        last_outcome = AgentOutcome::Malformed;
                        last_error = Some(err.to_string());
                        debug!(agent_id = %spec.id, attempts, error = %err, "agent output malformed");
                    }
                },
            }

            if attempts < max_attempts {
                let backoff = requested_backoff
                    .take()
                    .unwrap_or_else(|| backoff_delay(config.retry_backoff(), attempts));
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = wait_cancelled(&mut cancel) => {
                        return AgentReport::terminal(spec, AgentOutcome::Skipped, attempts, None);
                    }
                }
            }
        }

        warn!(
            agent_id = %spec.id,
            attempts,
            outcome = %last_outcome,
            "agent exhausted retries"
        );
        AgentReport::terminal(spec, last_outcome, attempts, last_error)
    }
}

/// Exponential backoff: base doubles per completed attempt.
fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    base * 2u32.saturating_pow(attempts.saturating_sub(1))
}

/// Resolve once the cancel signal is observed true; pend forever if the
/// sender is gone without ever signalling.
pub(crate) async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
