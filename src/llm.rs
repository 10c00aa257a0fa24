//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{ChatError, Result};
use crate::message::Message;

/// Per-request generation settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub stop: Vec<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Result of a chat completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> ChatError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string());

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return ChatError::Authentication(format!("{provider} rejected the API key: {detail}"));
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ChatError::LanguageModel(format!("{provider} rate limit exceeded: {detail}"));
    }
    ChatError::LanguageModel(format!("{provider} request failed with {status}: {detail}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Groq Client (OpenAI-compatible API)
// ─────────────────────────────────────────────────────────────────────────────

/// Groq client - uses OpenAI-compatible API with Groq's endpoint.
#[derive(Clone)]
pub struct GroqClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    stream: bool,
}

impl GroqClient {
    pub fn from_config(cfg: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.timeout_secs))
                .build()
                .map_err(|err| ChatError::LanguageModel(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key: api_key.into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            stream: cfg.stream,
        })
    }

    async fn read_stream(resp: reqwest::Response) -> Result<ModelCompletion> {
        let mut completion = ModelCompletion::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|err| ChatError::LanguageModel(format!("Groq stream error: {err}")))?;
            pending.extend_from_slice(&chunk);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                if apply_stream_line(line.trim(), &mut completion)? {
                    return Ok(completion);
                }
            }
        }

        let rest = String::from_utf8_lossy(&pending).into_owned();
        apply_stream_line(rest.trim(), &mut completion)?;
        Ok(completion)
    }
}

/// Fold one SSE line into `completion`. Returns true once `[DONE]` arrives.
fn apply_stream_line(line: &str, completion: &mut ModelCompletion) -> Result<bool> {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(false);
    };
    if data == "[DONE]" {
        return Ok(true);
    }
    let chunk: StreamChunk = serde_json::from_str(data).map_err(|err| {
        ChatError::LanguageModel(format!("Groq stream parse error `{data}`: {err}"))
    })?;
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(delta) = choice.delta.content {
            completion.content.push_str(&delta);
        }
        if choice.finish_reason.is_some() {
            completion.finish_reason = choice.finish_reason;
        }
    }
    if let Some(usage) = chunk.x_groq.and_then(|x| x.usage) {
        completion.usage = Some(usage);
    }
    Ok(false)
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<ModelCompletion> {
        if self.api_key.trim().is_empty() {
            return Err(ChatError::Authentication(
                "no Groq API key was provided".into(),
            ));
        }

        let oai_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": oai_messages,
            "stream": self.stream,
        });
        if !options.stop.is_empty() {
            body["stop"] = json!(options.stop);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::LanguageModel(format!("Groq request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "Groq"));
        }

        let completion = if self.stream {
            Self::read_stream(resp).await?
        } else {
            let parsed: ChatResponse = resp
                .json()
                .await
                .map_err(|e| ChatError::LanguageModel(format!("Groq parse error: {e}")))?;
            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ChatError::LanguageModel("Groq returned no choices".into()))?;
            ModelCompletion {
                content: choice.message.content.unwrap_or_default(),
                finish_reason: choice.finish_reason,
                usage: parsed.usage,
            }
        };

        debug!(
            model = %self.model,
            chars = completion.content.len(),
            finish_reason = ?completion.finish_reason,
            usage = ?completion.usage,
            "completion received"
        );
        Ok(completion)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    x_groq: Option<GroqExtras>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqExtras {
    #[serde(default)]
    usage: Option<TokenUsage>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub Model
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic model used for tests and demos. Replies are returned in order.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Every request seen so far, oldest first.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<ModelCompletion> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        let mut locked = self
            .responses
            .lock()
            .map_err(|_| ChatError::LanguageModel("stub model poisoned".into()))?;
        let content = locked.pop_front().ok_or_else(|| {
            ChatError::LanguageModel("StubModel ran out of scripted responses".into())
        })?;
        Ok(ModelCompletion {
            content,
            finish_reason: Some("stop".into()),
            usage: None,
        })
    }
}
