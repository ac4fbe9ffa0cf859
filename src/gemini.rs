//! Minimal client for Gemini's `generateContent` REST endpoint.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::debug;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// A text-in, text-out language model.
pub trait ModelClient: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct GeminiClient {
    agent: ureq::Agent,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("tubegrab/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{GEMINI_API_BASE}/{}:generateContent", self.model)
    }
}

impl ModelClient for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [ { "role": "user", "parts": [ { "text": prompt } ] } ]
        });
        debug!(model = %self.model, prompt_len = prompt.len(), "calling gemini");

        let response = match self
            .agent
            .post(&self.endpoint())
            .query("key", &self.api_key)
            .send_json(body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                bail!("Gemini API error: {code} - {detail}");
            }
            Err(err) => return Err(err).context("calling Gemini API"),
        };

        let value: Value = response
            .into_json()
            .context("decoding Gemini API response")?;
        response_text(&value).ok_or_else(|| anyhow!("Gemini response contained no text"))
    }
}

/// Joins `candidates[0].content.parts[*].text`.
pub fn response_text(value: &Value) -> Option<String> {
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)?;
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
