//! Reasoning oracle client
//!
//! HTTP client for an OpenAI-compatible chat completions endpoint. One request,
//! one reply, no streaming and no retry; the caller decides what a failure means.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::LlmConfig;
use crate::error::OracleError;

/// Default timeout for completion requests (120 seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Free-text reasoning service
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Single round trip returning the raw reply text
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, OracleError>;
}

/// Chat completions client
pub struct ChatCompletionClient {
    /// API base URL
    base_url: String,
    api_key: String,
    model: String,
    /// HTTP client with connection pooling
    http_client: Client,
    timeout: Duration,
}

impl ChatCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self, OracleError> {
        Self::with_timeout(config, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(config: &LlmConfig, timeout: Duration) -> Result<Self, OracleError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| OracleError::Transport(format!("failed to create HTTP client: {}", e)))?;

        info!(
            "Oracle client initialized: url={}, model={}, timeout={:?}",
            config.base_url, config.model, timeout
        );

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            http_client,
            timeout,
        })
    }
}

#[async_trait]
impl ReasoningOracle for ChatCompletionClient {
    /// POST /chat/completions with a system and a user message
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            stream: false,
        };

        debug!(
            "Requesting completion: model={}, prompt_chars={}",
            self.model,
            user_prompt.len()
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Transport(format!("request timed out after {:?}", self.timeout))
                } else if e.is_connect() {
                    OracleError::Transport(format!("failed to connect to {}: {}", url, e))
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Oracle returned error: status={}, body={}", status, body);
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(OracleError::EmptyReply)?;

        if let Some(usage) = reply.usage {
            debug!(
                "Completion usage: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(content)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
