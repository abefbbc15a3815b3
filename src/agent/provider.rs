use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::Settings;

const MAX_ERROR_BODY_CHARS: usize = 600;

/// Payload handed back when the service answers with nothing at all.
pub const EMPTY_CONTENT_PAYLOAD: &str =
    r#"{"explanation": ["No content returned by the generation service."], "command": ""}"#;

// ── Conversation message types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failures talking to the generation service. None of these are retried by
/// the attempt loop; they end the run.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("could not reach the service: {0}")]
    Transport(String),

    #[error("authentication rejected (HTTP {status}); check the API key: {body}")]
    Auth { status: u16, body: String },

    #[error("rate limit exceeded: {body}")]
    RateLimit { body: String },

    #[error("quota exhausted; check billing for this API key: {body}")]
    Quota { body: String },

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected service response: {0}")]
    Unknown(String),
}

impl GenerationError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = truncate_body(body);
        match status {
            401 | 403 => Self::Auth { status, body },
            429 if body.contains("insufficient_quota") || body.contains("quota") => {
                Self::Quota { body }
            }
            429 => Self::RateLimit { body },
            _ => Self::Status { status, body },
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Unknown(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    out.push_str("...");
    out
}

// ── Backend seam ──────────────────────────────────────────────────────────────

/// One synchronous request/response exchange with a text-generation service.
/// `Ok(None)` means the service answered but carried no content.
pub trait ChatBackend {
    fn complete(&self, messages: &[Message]) -> Result<Option<String>, GenerationError>;
}

impl<B: ChatBackend + ?Sized> ChatBackend for &B {
    fn complete(&self, messages: &[Message]) -> Result<Option<String>, GenerationError> {
        (**self).complete(messages)
    }
}

// ── OpenAI-compatible wire types ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

fn build_request<'a>(messages: &'a [Message], model: &'a str, temperature: f32) -> ApiRequest<'a> {
    ApiRequest {
        model,
        messages: messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
        temperature,
        response_format: ResponseFormat {
            kind: "json_object",
        },
    }
}

fn first_choice_content(resp: ApiResponse) -> Option<String> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
}

// ── HTTP client builder ───────────────────────────────────────────────────────

pub fn build_http_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10));

    if let Ok(proxy_url) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("HTTP_PROXY")) {
        builder = builder.proxy(reqwest::Proxy::all(&proxy_url).context("invalid proxy URL")?);
    }

    builder.build().context("failed to build HTTP client")
}

// ── OpenAI-compatible provider ────────────────────────────────────────────────

pub struct OpenAiProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = build_http_client(Duration::from_secs(settings.request_timeout_secs))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        })
    }
}

impl ChatBackend for OpenAiProvider {
    fn complete(&self, messages: &[Message]) -> Result<Option<String>, GenerationError> {
        let body = build_request(messages, &self.model, self.temperature);
        debug!(model = %self.model, messages = messages.len(), "sending chat completion request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(GenerationError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            let err = GenerationError::from_status(status.as_u16(), &text);
            error!(status = status.as_u16(), "generation service returned an error: {err}");
            return Err(err);
        }

        let parsed: ApiResponse = resp.json().map_err(GenerationError::from_reqwest)?;
        Ok(first_choice_content(parsed))
    }
}

// ── Response generator ────────────────────────────────────────────────────────

/// Sends the instruction document plus history and returns the raw reply text.
pub struct ResponseGenerator<B> {
    backend: B,
}

impl<B: ChatBackend> ResponseGenerator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn generate(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend(history.iter().filter(|m| !m.content.is_empty()).cloned());

        match self.backend.complete(&messages)? {
            Some(text) => Ok(text),
            None => {
                warn!("generation service returned empty content");
                Ok(EMPTY_CONTENT_PAYLOAD.to_string())
            }
        }
    }
}
