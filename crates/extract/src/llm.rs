use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::{LlmMode, PipelineConfig};
use crate::error::LlmError;
use crate::metrics::{AttemptOutcome, GatewayStats};
use crate::retry::RetryPolicy;

/// Per-call sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self { temperature: 0.01 }
    }
}

/// One round trip to a language model. Implementations classify their own
/// failures; retrying is the gateway's job.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// Map an HTTP status to the failure class.
pub fn classify_status(status: StatusCode, detail: &str) -> LlmError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(detail, 200));
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        LlmError::Transient(message)
    } else {
        LlmError::Permanent(message)
    }
}

fn classify_transport(e: reqwest::Error) -> LlmError {
    if e.is_builder() {
        LlmError::Permanent(format!("invalid request: {e}"))
    } else if e.is_timeout() {
        LlmError::Transient(format!("request timed out: {e}"))
    } else if e.is_connect() {
        LlmError::Transient(format!("connection failed: {e}"))
    } else {
        LlmError::Transient(e.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Permanent(format!("failed to build HTTP client: {e}")))
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Local Ollama-style generation server.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: build_http_client(timeout_secs)?,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("malformed Ollama response: {e}")))?;

        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ResponseMessage,
}

/// OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    api_base: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::Permanent("missing API key".to_string()));
        }
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: build_http_client(timeout_secs)?,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(format!("malformed completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Transient("completion response had no choices".to_string()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Shared entry point for every model call in the pipeline: bounded
/// concurrency, retry with backoff, call counters.
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    limiter: Semaphore,
    params: CompletionParams,
    stats: Arc<GatewayStats>,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, retry: RetryPolicy, max_concurrent_calls: usize) -> Self {
        Self {
            client,
            retry,
            limiter: Semaphore::new(max_concurrent_calls.max(1)),
            params: CompletionParams::default(),
            stats: Arc::new(GatewayStats::new()),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, LlmError> {
        let llm = &config.llm;
        let client: Arc<dyn LlmClient> = match &llm.mode {
            LlmMode::Local { base_url } => {
                Arc::new(OllamaClient::new(base_url, &llm.model, llm.request_timeout_secs)?)
            }
            LlmMode::Remote { api_base, api_key } => Arc::new(OpenAiClient::new(
                api_base,
                api_key,
                &llm.model,
                llm.request_timeout_secs,
            )?),
        };

        let mut gateway = Self::new(
            client,
            RetryPolicy::from_config(&config.retry),
            config.concurrency.max_concurrent_llm_calls,
        );
        gateway.params = CompletionParams {
            temperature: llm.temperature,
        };
        Ok(gateway)
    }

    pub fn stats(&self) -> Arc<GatewayStats> {
        Arc::clone(&self.stats)
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete_with(prompt, &self.params).await
    }

    pub async fn complete_with(&self, prompt: &str, params: &CompletionParams) -> Result<String, LlmError> {
        let attempts = AtomicUsize::new(0);
        let attempts_ref = &attempts;

        let result = self
            .retry
            .retry("llm_complete", LlmError::is_transient, move || async move {
                attempts_ref.fetch_add(1, Ordering::Relaxed);
                self.attempt(prompt, params).await
            })
            .await;

        let retries = attempts.load(Ordering::Relaxed).saturating_sub(1);
        if retries > 0 {
            self.stats.record_retries(retries);
        }
        result
    }

    async fn attempt(&self, prompt: &str, params: &CompletionParams) -> Result<String, LlmError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| LlmError::Permanent("LLM gateway is shut down".to_string()))?;

        let start = Instant::now();
        let result = match self.client.complete(prompt, params).await {
            Ok(text) if text.trim().is_empty() => {
                Err(LlmError::Transient("model returned an empty response".to_string()))
            }
            other => other,
        };

        let outcome = match &result {
            Ok(_) => AttemptOutcome::Success,
            Err(LlmError::Transient(_)) => AttemptOutcome::Transient,
            Err(LlmError::Permanent(_)) => AttemptOutcome::Permanent,
        };
        self.stats.record_attempt(start.elapsed(), outcome);

        debug!(
            client = self.client.name(),
            prompt_chars = prompt.chars().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "LLM call finished"
        );
        result
    }
}
