//! Job lifecycle driver: submission, pipeline execution, cancellation.
//!
//! The runner is the sole writer of job state. A job moves
//! pending -> running -> one terminal status, with every change
//! persisted and emitted before the next stage starts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::agents::{AgentSpec, CritiqueRequest, ReasoningService};
use crate::arbitration::ArbitrationEngine;
use crate::config::JobConfig;
use crate::critique::{AgentId, AgentOutcome};
use crate::dispatch::{wait_cancelled, AgentDispatcher, DispatchError};
use crate::events::{EventSink, JobEvent};
use crate::job::state::{JobId, JobStatus, ResearchJob, TransitionError};
use crate::job::store::{JobStore, StoreError};
use crate::judge::{JudgeSynthesizer, JudgeVerdict};

/// A review job submission.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    /// Caller-supplied id; generated when absent.
    pub id: Option<JobId>,
    /// Submitting principal, when the caller identifies itself.
    pub owner: Option<String>,
    pub content: String,
    pub goal: String,
    pub context: Option<String>,
    /// Agent panel override; the default four-role panel when absent.
    pub agents: Option<Vec<AgentSpec>>,
    /// Per-job knob overrides; the runner defaults when absent.
    pub config: Option<JobConfig>,
}

impl JobSubmission {
    pub fn new(content: &str, goal: &str) -> Self {
        Self {
            id: None,
            owner: None,
            content: content.to_string(),
            goal: goal.to_string(),
            context: None,
            agents: None,
            config: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    pub fn with_agents(mut self, agents: Vec<AgentSpec>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Rejected submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("goal must not be empty")]
    EmptyGoal,

    #[error("at least one agent is required")]
    NoAgents,

    #[error("duplicate agent id in panel: {0}")]
    DuplicateAgentId(AgentId),

    #[error("success threshold {required} exceeds panel size {panel}")]
    ThresholdUnreachable { required: usize, panel: usize },

    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error(transparent)]
    Store(StoreError),
}

/// Failures while running a job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("insufficient successful agents: {succeeded} of {required} required")]
    InsufficientAgents { succeeded: usize, required: usize },

    #[error("job deadline exceeded")]
    DeadlineExceeded,

    #[error("job was cancelled")]
    Cancelled,

    #[error("job is not pending: {0}")]
    NotPending(JobStatus),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Snapshot of a job for status queries: lifecycle state, per-agent
/// outcomes, and the verdict once one exists.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub agent_outcomes: BTreeMap<AgentId, AgentOutcome>,
    pub verdict: Option<JudgeVerdict>,
    pub failure: Option<String>,
}

/// Drives jobs through dispatch, arbitration, and judgment.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    service: Arc<dyn ReasoningService>,
    events: Arc<dyn EventSink>,
    defaults: JobConfig,
    cancels: RwLock<HashMap<JobId, watch::Sender<bool>>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        service: Arc<dyn ReasoningService>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            service,
            events,
            defaults: JobConfig::default(),
            cancels: RwLock::new(HashMap::new()),
        }
    }

    /// Override the default per-job knobs.
    pub fn with_defaults(mut self, defaults: JobConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn shared(self) -> Arc<JobRunner> {
        Arc::new(self)
    }

    /// Validate and record a submission. The job is persisted as
    /// pending; nothing runs until [`run`](Self::run).
    pub fn submit(&self, submission: JobSubmission) -> Result<JobId, SubmitError> {
        if submission.content.trim().is_empty() {
            return Err(SubmitError::EmptyContent);
        }
        if submission.goal.trim().is_empty() {
            return Err(SubmitError::EmptyGoal);
        }

        let agents = submission.agents.unwrap_or_else(AgentSpec::default_panel);
        if agents.is_empty() {
            return Err(SubmitError::NoAgents);
        }
        let mut seen = HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.id.clone()) {
                return Err(SubmitError::DuplicateAgentId(agent.id.clone()));
            }
        }
        let config = submission
            .config
            .unwrap_or_else(|| self.defaults.clone());
        if config.min_successful_agents > agents.len() {
            return Err(SubmitError::ThresholdUnreachable {
                required: config.min_successful_agents,
                panel: agents.len(),
            });
        }

        let id = submission
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let job = ResearchJob::new(
            &id,
            submission.owner,
            &submission.content,
            &submission.goal,
            submission.context,
            agents,
            config,
        );

        self.store.create(job).map_err(|e| match e {
            StoreError::DuplicateJob(id) => SubmitError::DuplicateJob(id),
            other => SubmitError::Store(other),
        })?;
        info!(job_id = %id, "job submitted");
        Ok(id)
    }

    /// Run a pending job to a terminal status.
    ///
    /// Returns the verdict on completion. On failure the job record
    /// carries the cause; cancellation and the job deadline surface as
    /// their own error variants.
    pub async fn run(&self, id: &str) -> Result<JudgeVerdict, JobError> {
        let mut job = self.store.get(id)?;
        if job.status != JobStatus::Pending {
            return Err(JobError::NotPending(job.status));
        }

        // The sender must be registered before the job reads as
        // running, or a cancel issued right after the status flip
        // finds no channel to signal.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Ok(mut cancels) = self.cancels.write() {
            cancels.insert(job.id.clone(), cancel_tx);
        }

        if let Err(err) = self.set_status(&mut job, JobStatus::Running, None) {
            if let Ok(mut cancels) = self.cancels.write() {
                cancels.remove(&job.id);
            }
            return Err(err);
        }

        let deadline = job.config.job_deadline();
        let outcome = timeout(deadline, self.run_pipeline(&mut job, cancel_rx)).await;

        if let Ok(mut cancels) = self.cancels.write() {
            cancels.remove(&job.id);
        }

        match outcome {
            Ok(Ok(verdict)) => {
                self.set_status(&mut job, JobStatus::Completed, None)?;
                Ok(verdict)
            }
            Ok(Err(JobError::Cancelled)) => {
                self.set_status(
                    &mut job,
                    JobStatus::Cancelled,
                    Some("cancelled by request".to_string()),
                )?;
                Err(JobError::Cancelled)
            }
            Ok(Err(err)) => {
                job.failure = Some(err.to_string());
                self.set_status(&mut job, JobStatus::Failed, Some(err.to_string()))?;
                Err(err)
            }
            Err(_) => {
                // Deadline elapsed; whatever the pipeline had produced
                // is discarded.
                warn!(job_id = %job.id, deadline_ms = job.config.job_deadline_ms, "job deadline exceeded");
                let err = JobError::DeadlineExceeded;
                job.failure = Some(err.to_string());
                self.set_status(&mut job, JobStatus::Failed, Some(err.to_string()))?;
                Err(err)
            }
        }
    }

    async fn run_pipeline(
        &self,
        job: &mut ResearchJob,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<JudgeVerdict, JobError> {
        let request = CritiqueRequest {
            content: job.content.clone(),
            goal: job.goal.clone(),
            context: job.context.clone(),
        };

        let dispatcher = AgentDispatcher::new(self.service.clone(), self.events.clone());
        let mut outcome = dispatcher
            .dispatch(&job.id, &request, &job.agents, &job.config, cancel.clone())
            .await;

        job.agent_outcomes = outcome.outcomes();
        self.store.update(job.clone())?;

        if outcome.cancelled {
            return Err(JobError::Cancelled);
        }
        outcome
            .ensure_threshold(job.config.min_successful_agents)
            .map_err(|DispatchError::InsufficientAgents { succeeded, required }| {
                JobError::InsufficientAgents { succeeded, required }
            })?;

        let skipped = outcome.skipped();
        let mut trees = outcome.take_trees();

        // Cancellation stays observable between stages; a signal
        // during arbitration or judging drops the in-flight call.
        let engine = ArbitrationEngine::new(self.service.clone(), self.events.clone());
        let report = tokio::select! {
            report = engine.arbitrate(&job.id, &job.goal, &mut trees) => Some(report),
            _ = wait_cancelled(&mut cancel) => None,
        };
        let Some(report) = report else {
            return Err(JobError::Cancelled);
        };

        let judge = JudgeSynthesizer::new(self.service.clone(), self.events.clone());
        let verdict = tokio::select! {
            verdict = judge.synthesize(
                &job.id,
                &job.goal,
                &trees,
                &report,
                skipped,
                job.config.judge_retries,
            ) => Some(verdict),
            _ = wait_cancelled(&mut cancel) => None,
        };
        let Some(verdict) = verdict else {
            return Err(JobError::Cancelled);
        };

        job.result = Some(crate::job::state::JobResult {
            verdict: verdict.clone(),
            trees,
        });
        self.store.update(job.clone())?;

        Ok(verdict)
    }

    /// Request cancellation.
    ///
    /// A pending job moves straight to cancelled; a running job is
    /// signalled and settles through its pipeline. Repeats on an
    /// already-cancelled job are no-ops.
    pub fn cancel(&self, id: &str) -> Result<(), JobError> {
        let mut job = self.store.get(id)?;
        match job.status {
            JobStatus::Pending => {
                self.set_status(
                    &mut job,
                    JobStatus::Cancelled,
                    Some("cancelled before start".to_string()),
                )?;
                Ok(())
            }
            JobStatus::Running => {
                if let Ok(cancels) = self.cancels.read() {
                    if let Some(tx) = cancels.get(id) {
                        // Receiver side may already be gone; settling
                        // happens in run() either way.
                        let _ = tx.send(true);
                    }
                }
                Ok(())
            }
            JobStatus::Cancelled => Ok(()),
            other => Err(JobError::Transition(TransitionError {
                from: other,
                to: JobStatus::Cancelled,
            })),
        }
    }

    /// Current status of a job.
    pub fn status(&self, id: &str) -> Result<JobStatus, JobError> {
        Ok(self.store.get(id)?.status)
    }

    /// Consumer-facing snapshot of a job's progress and outcome.
    pub fn view(&self, id: &str) -> Result<JobStatusView, JobError> {
        let job = self.store.get(id)?;
        Ok(JobStatusView {
            id: job.id,
            status: job.status,
            agent_outcomes: job.agent_outcomes,
            verdict: job.result.map(|r| r.verdict),
            failure: job.failure,
        })
    }

    /// Full job record.
    pub fn get(&self, id: &str) -> Result<ResearchJob, JobError> {
        Ok(self.store.get(id)?)
    }

    fn set_status(
        &self,
        job: &mut ResearchJob,
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<(), JobError> {
        let old = job.status;
        job.transition(to, reason)?;
        self.store.update(job.clone())?;
        if old != job.status {
            self.events.publish(JobEvent::JobStatusChanged {
                job_id: job.id.clone(),
                old,
                new: job.status,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentError, AgentKind, AgentResult, ArbitrationRequest, JudgeRequest};
    use crate::events::EventBus;
    use crate::job::store::InMemoryJobStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct WellBehavedService;

    #[async_trait]
    impl ReasoningService for WellBehavedService {
        async fn critique(
            &self,
            _agent: &AgentSpec,
            _request: &CritiqueRequest,
        ) -> AgentResult<Value> {
            Ok(json!({
                "claim": "the method section omits the control condition",
                "evidence": "section 3 describes only the treatment arm",
                "confidence": 0.8,
                "severity": "high",
                "recommendation": "describe the control condition"
            }))
        }

        async fn arbitrate(&self, _request: &ArbitrationRequest) -> AgentResult<Value> {
            Ok(json!([]))
        }

        async fn judge(&self, _request: &JudgeRequest) -> AgentResult<Value> {
            Ok(json!({
                "summary_text": "One shared methodological gap.",
                "overall_score": 55,
                "score_justification": "The gap is material."
            }))
        }
    }

    struct HangingCritiqueService;

    #[async_trait]
    impl ReasoningService for HangingCritiqueService {
        async fn critique(
            &self,
            _agent: &AgentSpec,
            _request: &CritiqueRequest,
        ) -> AgentResult<Value> {
            tokio::time::sleep(std::time::Duration::from_secs(86_400)).await;
            Err(AgentError::Unavailable("never returns".to_string()))
        }

        async fn arbitrate(&self, _request: &ArbitrationRequest) -> AgentResult<Value> {
            Ok(json!([]))
        }

        async fn judge(&self, _request: &JudgeRequest) -> AgentResult<Value> {
            Ok(json!({}))
        }
    }

    struct BrokenCritiqueService;

    #[async_trait]
    impl ReasoningService for BrokenCritiqueService {
        async fn critique(
            &self,
            _agent: &AgentSpec,
            _request: &CritiqueRequest,
        ) -> AgentResult<Value> {
            Err(AgentError::Transport("connection refused".to_string()))
        }

        async fn arbitrate(&self, _request: &ArbitrationRequest) -> AgentResult<Value> {
            Ok(json!([]))
        }

        async fn judge(&self, _request: &JudgeRequest) -> AgentResult<Value> {
            Ok(json!({}))
        }
    }

    fn runner(service: Arc<dyn ReasoningService>) -> JobRunner {
        let config = JobConfig {
            retry_backoff_ms: 10,
            ..JobConfig::default()
        };
        JobRunner::new(InMemoryJobStore::shared(), service, EventBus::new().shared())
            .with_defaults(config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_run_to_completion() {
        let runner = runner(Arc::new(WellBehavedService));
        let id = runner
            .submit(JobSubmission::new("draft", "evaluate"))
            .unwrap();

        assert_eq!(runner.status(&id).unwrap(), JobStatus::Pending);
        let verdict = runner.run(&id).await.unwrap();

        assert_eq!(verdict.score, 55);
        let job = runner.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.agent_outcomes.len(), 4);
        let result = job.result.unwrap();
        assert_eq!(result.trees.len(), 4);
        assert_eq!(job.transitions.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_agents_failing_fails_job() {
        let runner = runner(Arc::new(BrokenCritiqueService));
        let id = runner
            .submit(JobSubmission::new("draft", "evaluate"))
            .unwrap();

        let err = runner.run(&id).await.unwrap_err();
        match err {
            JobError::InsufficientAgents { succeeded, required } => {
                assert_eq!(succeeded, 0);
                assert_eq!(required, 2);
            }
            other => panic!("unexpected error: {other}"),
        }

        let job = runner.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.failure.unwrap().contains("insufficient"));
        assert!(job.result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_validation() {
        let runner = runner(Arc::new(WellBehavedService));

        assert_eq!(
            runner.submit(JobSubmission::new("  ", "goal")).unwrap_err(),
            SubmitError::EmptyContent
        );
        assert_eq!(
            runner.submit(JobSubmission::new("content", "")).unwrap_err(),
            SubmitError::EmptyGoal
        );
        assert_eq!(
            runner
                .submit(JobSubmission::new("content", "goal").with_agents(vec![]))
                .unwrap_err(),
            SubmitError::NoAgents
        );
        assert_eq!(
            runner
                .submit(JobSubmission::new("content", "goal").with_agents(vec![
                    AgentSpec::new("twin", AgentKind::Evidence),
                    AgentSpec::new("twin", AgentKind::Clarity),
                ]))
                .unwrap_err(),
            SubmitError::DuplicateAgentId("twin".to_string())
        );
        // min_successful_agents defaults to 2; a panel of one cannot
        // reach it.
        assert_eq!(
            runner
                .submit(
                    JobSubmission::new("content", "goal")
                        .with_agents(vec![AgentSpec::new("solo", AgentKind::Adversary)])
                )
                .unwrap_err(),
            SubmitError::ThresholdUnreachable {
                required: 2,
                panel: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_config_overrides_defaults() {
        let runner = runner(Arc::new(WellBehavedService));
        // A solo panel clears validation only because the override
        // lowers the threshold below the default of 2.
        let config = JobConfig {
            min_successful_agents: 1,
            retry_backoff_ms: 10,
            ..JobConfig::default()
        };
        let id = runner
            .submit(
                JobSubmission::new("draft", "goal")
                    .with_agents(vec![AgentSpec::new("solo", AgentKind::Adversary)])
                    .with_config(config),
            )
            .unwrap();

        assert_eq!(runner.get(&id).unwrap().config.min_successful_agents, 1);

        let verdict = runner.run(&id).await.unwrap();
        assert_eq!(verdict.score, 55);
        let job = runner.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.agent_outcomes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_rejected() {
        let runner = runner(Arc::new(WellBehavedService));
        runner
            .submit(JobSubmission::new("draft", "goal").with_id("job-1"))
            .unwrap();
        assert_eq!(
            runner
                .submit(JobSubmission::new("other", "goal").with_id("job-1"))
                .unwrap_err(),
            SubmitError::DuplicateJob("job-1".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_requires_pending() {
        let runner = runner(Arc::new(WellBehavedService));
        let id = runner
            .submit(JobSubmission::new("draft", "goal"))
            .unwrap();
        runner.run(&id).await.unwrap();

        let err = runner.run(&id).await.unwrap_err();
        assert!(matches!(err, JobError::NotPending(JobStatus::Completed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_job() {
        let runner = runner(Arc::new(WellBehavedService));
        let id = runner
            .submit(JobSubmission::new("draft", "goal"))
            .unwrap();

        runner.cancel(&id).unwrap();
        assert_eq!(runner.status(&id).unwrap(), JobStatus::Cancelled);

        // Idempotent repeat.
        runner.cancel(&id).unwrap();
        // A cancelled job cannot be run.
        assert!(matches!(
            runner.run(&id).await.unwrap_err(),
            JobError::NotPending(JobStatus::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_lands_as_soon_as_job_reads_running() {
        let runner = runner(Arc::new(HangingCritiqueService)).shared();
        let id = runner
            .submit(JobSubmission::new("draft", "goal"))
            .unwrap();

        let worker = {
            let runner = runner.clone();
            let id = id.clone();
            tokio::spawn(async move { runner.run(&id).await })
        };

        // The moment status reads running the cancel channel must
        // already be registered, so this signal can never be lost.
        while runner.status(&id).unwrap() != JobStatus::Running {
            tokio::task::yield_now().await;
        }
        runner.cancel(&id).unwrap();

        let err = worker.await.unwrap().unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert_eq!(runner.status(&id).unwrap(), JobStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_completed_job_rejected() {
        let runner = runner(Arc::new(WellBehavedService));
        let id = runner
            .submit(JobSubmission::new("draft", "goal"))
            .unwrap();
        runner.run(&id).await.unwrap();

        assert!(matches!(
            runner.cancel(&id).unwrap_err(),
            JobError::Transition(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_reflects_outcome() {
        let runner = runner(Arc::new(WellBehavedService));
        let id = runner
            .submit(
                JobSubmission::new("draft", "goal").with_owner("reviews-team"),
            )
            .unwrap();

        let view = runner.view(&id).unwrap();
        assert_eq!(view.status, JobStatus::Pending);
        assert!(view.verdict.is_none());
        assert_eq!(runner.get(&id).unwrap().owner.as_deref(), Some("reviews-team"));

        runner.run(&id).await.unwrap();
        let view = runner.view(&id).unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.verdict.unwrap().score, 55);
        assert_eq!(view.agent_outcomes.len(), 4);
        assert!(view.failure.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_job_errors() {
        let runner = runner(Arc::new(WellBehavedService));
        assert!(matches!(
            runner.status("ghost").unwrap_err(),
            JobError::Store(StoreError::NotFound(_))
        ));
        assert!(matches!(
            runner.cancel("ghost").unwrap_err(),
            JobError::Store(StoreError::NotFound(_))
        ));
    }
}
