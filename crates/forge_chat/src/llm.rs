//! LLM collaborator contract and the bundled HTTP adapter.
//!
//! The pipeline only ever talks to `LlmClient`; the adapter supports OpenAI
//! and Anthropic APIs, selected via environment variables. Everything keeps
//! working with no client configured - callers fall back to deterministic
//! heuristics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ChatError, ChatResult};
use crate::types::{Message, MessageRole};

/// Completion service contract.
///
/// Callers must treat a non-well-formed-JSON response exactly like an
/// error; the adapter itself makes no promises about content.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a conversation. `force_json` requests strict-JSON output
    /// where the provider supports it.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        force_json: bool,
    ) -> ChatResult<String>;
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

/// HTTP-backed `LlmClient` supporting OpenAI and Anthropic.
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new adapter with explicit configuration.
    pub fn new(provider: LlmProvider, api_key: String, model: Option<String>) -> Self {
        let default_model = match provider {
            LlmProvider::OpenAI => "gpt-4o".to_string(),
            LlmProvider::Anthropic => "claude-sonnet-4.5".to_string(),
        };

        Self {
            provider,
            api_key,
            model: model.unwrap_or(default_model),
            client: reqwest::Client::new(),
        }
    }

    /// Create an adapter from environment variables.
    ///
    /// Checks in order:
    /// 1. OPENAI_API_KEY
    /// 2. ANTHROPIC_API_KEY
    ///
    /// FORGE_LLM_MODEL overrides the provider default model.
    pub fn from_env() -> ChatResult<Self> {
        let custom_model = std::env::var("FORGE_LLM_MODEL").ok();

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            if !api_key.is_empty() {
                return Ok(Self::new(LlmProvider::OpenAI, api_key, custom_model));
            }
        }

        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            if !api_key.is_empty() {
                return Ok(Self::new(LlmProvider::Anthropic, api_key, custom_model));
            }
        }

        Err(ChatError::Llm(
            "No LLM configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY".to_string(),
        ))
    }

    /// Get the current provider
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Get the current model
    pub fn model(&self) -> &str {
        &self.model
    }

    // OpenAI chat completion
    async fn complete_openai(
        &self,
        system: &str,
        messages: &[Message],
        force_json: bool,
    ) -> ChatResult<String> {
        let url = "https://api.openai.com/v1/chat/completions";

        let mut openai_messages = vec![OpenAIMessage {
            role: "system".to_string(),
            content: system.to_string(),
        }];
        openai_messages.extend(messages.iter().map(|m| OpenAIMessage {
            role: role_name(m.role).to_string(),
            content: m.content.clone(),
        }));

        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: openai_messages,
            temperature: 0.4,
            max_tokens: Some(1500),
            response_format: force_json.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        // Retry logic for transient errors (5xx, rate limits, network issues)
        const MAX_RETRIES: u32 = 3;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = std::time::Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(ChatError::Llm(format!("Network error: {}", e)));
                    continue;
                }
            };

            let status = response.status();

            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(ChatError::Llm(format!(
                    "OpenAI API error {} (attempt {}/{}): {}",
                    status,
                    attempt + 1,
                    MAX_RETRIES,
                    body
                )));
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ChatError::Llm(format!("OpenAI API error {}: {}", status, body)));
            }

            let result: OpenAIResponse = response
                .json()
                .await
                .map_err(|e| ChatError::Llm(format!("Failed to parse response: {}", e)))?;

            return result
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| ChatError::Llm("No response from OpenAI".to_string()));
        }

        Err(last_error.unwrap_or_else(|| ChatError::Llm("Max retries exceeded".to_string())))
    }

    // Anthropic chat completion
    async fn complete_anthropic(
        &self,
        system: &str,
        messages: &[Message],
        force_json: bool,
    ) -> ChatResult<String> {
        let url = "https://api.anthropic.com/v1/messages";

        // No JSON response mode on this API; spell the requirement out in
        // the system prompt instead.
        let system = if force_json {
            format!("{}\n\nRespond with ONLY valid JSON. No extra text.", system)
        } else {
            system.to_string()
        };

        let anthropic_messages: Vec<AnthropicMessage> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| AnthropicMessage {
                role: role_name(m.role).to_string(),
                content: m.content.clone(),
            })
            .collect();

        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: 1500,
            system,
            messages: anthropic_messages,
        };

        const MAX_RETRIES: u32 = 3;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = std::time::Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(ChatError::Llm(format!("Network error: {}", e)));
                    continue;
                }
            };

            let status = response.status();

            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(ChatError::Llm(format!(
                    "Anthropic API error {} (attempt {}/{}): {}",
                    status,
                    attempt + 1,
                    MAX_RETRIES,
                    body
                )));
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ChatError::Llm(format!(
                    "Anthropic API error {}: {}",
                    status, body
                )));
            }

            let result: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| ChatError::Llm(format!("Failed to parse response: {}", e)))?;

            return result
                .content
                .into_iter()
                .next()
                .map(|c| c.text)
                .ok_or_else(|| ChatError::Llm("No response from Anthropic".to_string()));
        }

        Err(last_error.unwrap_or_else(|| ChatError::Llm("Max retries exceeded".to_string())))
    }
}

#[async_trait]
impl LlmClient for LlmAdapter {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        force_json: bool,
    ) -> ChatResult<String> {
        info!("LLM completion via {:?} ({})", self.provider, self.model);
        match self.provider {
            LlmProvider::OpenAI => self.complete_openai(system, messages, force_json).await,
            LlmProvider::Anthropic => self.complete_anthropic(system, messages, force_json).await,
        }
    }
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: String,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted LLM client for tests.

    use super::*;

    /// Replays canned completions in order; errors once the script runs dry
    /// or when constructed as always-failing.
    pub struct ScriptedLlm {
        responses: parking_lot::Mutex<Vec<String>>,
        fail: bool,
    }

    impl ScriptedLlm {
        pub fn replies(responses: Vec<&str>) -> Self {
            Self {
                responses: parking_lot::Mutex::new(
                    responses.into_iter().rev().map(String::from).collect(),
                ),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                responses: parking_lot::Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            _system: &str,
            _messages: &[Message],
            _force_json: bool,
        ) -> ChatResult<String> {
            if self.fail {
                return Err(ChatError::Llm("scripted transport failure".to_string()));
            }
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| ChatError::Llm("script exhausted".to_string()))
        }
    }
}
