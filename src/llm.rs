/// LLM collaborator used to structure résumés and job postings.
///
/// The store does not depend on this module; it only supplies the
/// `generate(system_prompt, user_payload)` contract plus the lenient JSON
/// extraction the callers rely on.
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::LlmConfig;

pub const API_KEY_ENV: &str = "LLM_API_KEY";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM_API_KEY is not set")]
    MissingApiKey,
}

pub trait Generator: Send + Sync {
    fn generate(&self, system_prompt: &str, user_payload: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatResponse {
    fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    cfg: LlmConfig,
}

impl OpenAiClient {
    pub fn new(api_key: String, cfg: LlmConfig) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            cfg,
        })
    }

    /// Build a client with the key from the environment. A missing key is fatal for callers.
    pub fn from_env(cfg: LlmConfig) -> Result<Self, LlmError> {
        let key = std::env::var(API_KEY_ENV).map_err(|_| LlmError::MissingApiKey)?;
        Self::new(key, cfg)
    }
}

impl Generator for OpenAiClient {
    fn generate(&self, system_prompt: &str, user_payload: &str) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.cfg.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_payload,
                },
            ],
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
        };

        let url = format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = resp.json()?;
        parsed
            .text()
            .map(str::to_string)
            .ok_or(LlmError::EmptyContent)
    }
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("static regex")
});

/// Remove a Markdown code fence wrapping the whole reply, if present.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str())
}

/// Ask for a JSON reply; any failure yields an empty object.
pub fn structured(generator: &dyn Generator, system_prompt: &str, user_payload: &str) -> Value {
    let content = match generator.generate(system_prompt, user_payload) {
        Ok(c) => c,
        Err(e) => {
            error!("LLM request failed: {e}");
            return Value::Object(Default::default());
        }
    };
    debug!("Raw LLM response: {content}");

    match serde_json::from_str(strip_code_fence(&content)) {
        Ok(v) => v,
        Err(e) => {
            error!("JSON decoding failed: {e}");
            Value::Object(Default::default())
        }
    }
}
