//! OpenAI-compatible chat completions provider.
//!
//! Speaks `/v1/chat/completions` with `stream: true` and yields the
//! `choices[0].delta.content` fragments. Works against any server that
//! implements the same wire format.

use crate::config::LlmConfig;
use crate::context::ContextSnapshot;
use crate::error::ProviderError;
use crate::services::sse::SseParser;
use crate::services::{LanguageModel, TokenStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Streaming client for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiLlm {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiLlm {
    /// Create a client with default sampling settings.
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let defaults = LlmConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
            api_key: api_key.into(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }

    /// Build a client from config, reading the key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Auth`] if the variable is unset or empty and
    /// [`ProviderError::Request`] if the HTTP client cannot be built.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::Auth(format!("environment variable {} is not set", config.api_key_env))
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| ProviderError::Request(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request_body<'a>(&'a self, context: &'a ContextSnapshot) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: context
                .messages()
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Map a non-success HTTP status to a provider error.
fn map_http_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned());
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(format!("authentication failed: {message}")),
        code => ProviderError::Request(format!("HTTP {code}: {message}")),
    }
}

/// Pull the content delta out of one completions chunk.
///
/// Chunks without content (role announcements, finish markers) give
/// `Ok(None)`.
fn parse_delta(data: &str) -> Result<Option<String>, ProviderError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Stream(format!("malformed chunk: {e}")))?;
    if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(ProviderError::Stream(message.to_owned()));
    }
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from))
}

struct StreamState {
    bytes: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    ready: VecDeque<Result<String, ProviderError>>,
    done: bool,
}

impl StreamState {
    fn absorb(&mut self, events: impl IntoIterator<Item = crate::services::sse::SseEvent>) {
        for event in events {
            if self.done {
                return;
            }
            if event.is_done() {
                self.done = true;
                return;
            }
            match parse_delta(&event.data) {
                Ok(Some(token)) => self.ready.push_back(Ok(token)),
                Ok(None) => {}
                Err(e) => {
                    self.ready.push_back(Err(e));
                    self.done = true;
                }
            }
        }
    }
}

fn token_stream(
    bytes: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> TokenStream {
    let state = StreamState {
        bytes: Box::pin(bytes),
        parser: SseParser::new(),
        ready: VecDeque::new(),
        done: false,
    };
    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.parser.push(&chunk);
                    state.absorb(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ProviderError::Stream(e.to_string())), state));
                }
                None => {
                    let tail = state.parser.finish();
                    state.absorb(tail);
                    state.done = true;
                }
            }
        }
    }))
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, context: &ContextSnapshot) -> Result<TokenStream, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.api_url);
        debug!(model = %self.model, messages = context.len(), "POST {url}");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(context))
            .send()
            .await
            .map_err(|e| ProviderError::Request(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }
        Ok(token_stream(response.bytes_stream()))
    }
}
