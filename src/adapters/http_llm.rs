//! A real streaming [`LlmEngine`] over an OpenAI-compatible chat completions
//! endpoint, gated behind the `http-engines` feature.
//!
//! Out of the box the orchestrator runs entirely on the in-memory [`super::mock`]
//! adapters; this module is a worked example of the narrow streaming contract
//! against an actual network service, using the same request/SSE-decode shape
//! as the rest of this crate's provider adapters.
#![cfg(feature = "http-engines")]

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::sse::SseDecoder;
use super::{BoxStream, EngineHealth, LlmEngine, LlmRequest};
use crate::error::{OrchestratorError, Result};
use crate::llm::Role;
use crate::pipeline::messages::LlmToken;

/// Configuration for talking to an OpenAI-compatible `/chat/completions`
/// endpoint.
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

pub struct HttpLlmEngine {
    client: Client,
    config: HttpLlmConfig,
}

impl HttpLlmEngine {
    /// # Errors
    ///
    /// Returns an error if the underlying `reqwest` client cannot be built.
    pub fn new(config: HttpLlmConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if !request.pinned_prefix.is_empty() {
            messages.push(json!({"role": "system", "content": request.pinned_prefix}));
        }
        if let Some(state) = &request.session_state {
            messages.push(json!({"role": "system", "content": state}));
        }
        for (role, text) in &request.history {
            let role = match role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": text}));
        }
        messages.push(json!({"role": "user", "content": request.user_text}));

        json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.verbosity,
            "tools": serde_json::Value::Array(if request.tools_enabled { vec![] } else { vec![] }),
            "stream": true,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    delta: ChatCompletionDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmEngine for HttpLlmEngine {
    async fn start(
        &self,
        request: LlmRequest,
        cancel: CancellationToken,
    ) -> Result<BoxStream<LlmToken>> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::Transport(format!(
                "llm endpoint returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = byte_stream.next() => next,
                };
                let Some(chunk) = next else { break };
                let Ok(bytes) = chunk else { break };
                for event in decoder.push(&bytes) {
                    if event.is_done() {
                        let _ = tx.send(LlmToken { text: String::new(), is_end: true }).await;
                        return;
                    }
                    if let Some(token) = decode_chunk(&event.data) {
                        if tx.send(token).await.is_err() {
                            return;
                        }
                    }
                }
            }
            if let Some(event) = decoder.flush() {
                if let Some(token) = decode_chunk(&event.data) {
                    let _ = tx.send(token).await;
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn health(&self) -> EngineHealth {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        match self
            .client
            .get(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => EngineHealth::Ready,
            Ok(_) => EngineHealth::Degraded,
            Err(_) => EngineHealth::Down,
        }
    }
}

fn decode_chunk(data: &str) -> Option<LlmToken> {
    let parsed: ChatCompletionChunk = serde_json::from_str(data).ok()?;
    let choice = parsed.choices.into_iter().next()?;
    let text = choice.delta.content.unwrap_or_default();
    let is_end = choice.finish_reason.is_some();
    if text.is_empty() && !is_end {
        return None;
    }
    Some(LlmToken { text, is_end })
}
