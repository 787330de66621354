//! HTTP-backed [`ReasoningService`] implementation.
//!
//! Talks to an OpenAI-compatible chat completions endpoint. The core
//! owns timeouts and retries; this client makes exactly one request per
//! call and maps transport problems onto [`AgentError`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use std::collections::HashMap;

use orchestration::{
    AgentError, AgentKind, AgentResult, AgentSpec, ArbitrationRequest, CritiqueRequest,
    JudgeRequest, ReasoningService,
};

use crate::prompts;

/// Connection settings for the reasoning endpoint.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    pub api_key: String,
    /// Model used for every call unless a role override applies.
    pub model: String,
    /// Per-role model overrides for critique calls.
    pub role_models: HashMap<AgentKind, String>,
    /// Socket-level timeout; kept above the orchestrator's per-agent
    /// timeout so the core, not the client, decides when to give up.
    pub request_timeout: Duration,
    pub temperature: f64,
}

impl ServiceConfig {
    /// Read settings from `CRITIQUE_API_URL`, `CRITIQUE_API_KEY`, and
    /// `CRITIQUE_MODEL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("CRITIQUE_API_URL")
            .map_err(|_| anyhow::anyhow!("CRITIQUE_API_URL is not set"))?;
        let api_key = std::env::var("CRITIQUE_API_KEY")
            .map_err(|_| anyhow::anyhow!("CRITIQUE_API_KEY is not set"))?;
        let model =
            std::env::var("CRITIQUE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self {
            base_url,
            api_key,
            model,
            role_models: HashMap::new(),
            request_timeout: Duration::from_secs(120),
            temperature: 0.3,
        })
    }

    /// Route one critique role to a different model.
    pub fn with_role_model(mut self, kind: AgentKind, model: &str) -> Self {
        self.role_models.insert(kind, model.to_string());
        self
    }

    fn model_for(&self, kind: AgentKind) -> &str {
        self.role_models.get(&kind).unwrap_or(&self.model)
    }
}

/// Reasoning service backed by an OpenAI-compatible HTTP endpoint.
pub struct HttpReasoningService {
    config: ServiceConfig,
    client: reqwest::Client,
}

impl HttpReasoningService {
    pub fn new(config: ServiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    async fn complete(&self, model: &str, system: &str, user: &str) -> AgentResult<Value> {
        let body = json!({
            "model": model,
            "temperature": self.config.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1_000)
                .unwrap_or(1_000);
            return Err(AgentError::RateLimited { retry_after_ms });
        }
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Unavailable(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Transport(format!("{status}: {text}")));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                AgentError::Parse("completion envelope missing message content".to_string())
            })?;

        debug!(model, bytes = content.len(), "completion received");
        parse_json_content(content)
    }
}

/// Parse a completion body as JSON, tolerating a markdown code fence.
fn parse_json_content(content: &str) -> AgentResult<Value> {
    let trimmed = content.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    serde_json::from_str(inner).map_err(|e| AgentError::Parse(e.to_string()))
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn critique(
        &self,
        agent: &AgentSpec,
        request: &CritiqueRequest,
    ) -> AgentResult<Value> {
        self.complete(
            self.config.model_for(agent.kind),
            &prompts::critique_system_prompt(agent.kind),
            &prompts::critique_user_prompt(request),
        )
        .await
    }

    async fn arbitrate(&self, request: &ArbitrationRequest) -> AgentResult<Value> {
        self.complete(
            &self.config.model,
            prompts::arbitration_system_prompt(),
            &prompts::arbitration_user_prompt(request),
        )
        .await
    }

    async fn judge(&self, request: &JudgeRequest) -> AgentResult<Value> {
        self.complete(
            &self.config.model,
            prompts::judge_system_prompt(),
            &prompts::judge_user_prompt(request),
        )
        .await
    }
}
