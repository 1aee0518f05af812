use crate::error::GenerateError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const SYSTEM_PROMPT: &str = r#"You are a B2B sales strategist helping a company organise its leads and write outreach collateral.

Follow the formatting instructions in every request exactly. When a request asks for JSON, reply with the JSON value only: no markdown, no commentary before or after it."#;

/// The text-generation capability the pipeline is built on.
///
/// Implementations may be slow, may fail, and may return text that ignores
/// the requested format. Callers treat every error the same way they treat
/// unusable output.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Chat-completions client for OpenRouter (or any OpenAI-compatible endpoint).
pub struct OpenRouterClient {
    client: Client,
    settings: OpenRouterSettings,
}

impl OpenRouterClient {
    pub fn new(settings: OpenRouterSettings) -> Result<Self, GenerateError> {
        if settings.api_key.trim().is_empty() {
            return Err(GenerateError::MissingApiKey);
        }
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GenerateError::Network(e.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let request_body = json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "stream": true,
        });

        let mut response = self
            .client
            .post(&self.settings.base_url)
            .headers(openrouter_headers(&self.settings.api_key)?)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(map_api_error(status, &error_text));
        }

        let mut all_text = String::new();
        let mut lines = SseLineBuffer::default();

        while let Some(chunk) = response.chunk().await? {
            lines.push(&chunk, &mut all_text)?;
        }
        lines.finish(&mut all_text)?;

        debug!(
            model = %self.settings.model,
            prompt_chars = prompt.len(),
            response_chars = all_text.len(),
            "generation complete"
        );
        Ok(all_text)
    }
}

// ── Helpers ──

fn openrouter_headers(api_key: &str) -> Result<HeaderMap, GenerateError> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
        .map_err(|_| GenerateError::Network("API key contains invalid header characters".to_string()))?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert("HTTP-Referer", HeaderValue::from_static("https://github.com/lead-pitcher"));
    headers.insert("X-Title", HeaderValue::from_static("Lead Pitcher"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn map_api_error(status: reqwest::StatusCode, body: &str) -> GenerateError {
    let message = match status.as_u16() {
        401 => "Invalid API key. Check your key at openrouter.ai/keys".to_string(),
        402 => "Insufficient credits. Visit openrouter.ai to add funds.".to_string(),
        429 => "Rate limited. Please wait a moment and try again.".to_string(),
        400 if body.contains("model_not_found") || body.contains("not found") => {
            "Model not found. Check the model ID at openrouter.ai/models".to_string()
        }
        500 | 502 | 503 => "OpenRouter is temporarily unavailable. Try again in a moment.".to_string(),
        _ => format!("API error ({}): {}", status, body),
    };
    GenerateError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Raw stream bytes not yet terminated by a newline. Lines are decoded only
/// once complete, so a character split across chunks stays intact.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8], out: &mut String) -> Result<(), GenerateError> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            process_sse_line(String::from_utf8_lossy(&line[..pos]).trim_end(), out)?;
        }
        Ok(())
    }

    /// Last line may arrive without a trailing newline.
    fn finish(self, out: &mut String) -> Result<(), GenerateError> {
        process_sse_line(String::from_utf8_lossy(&self.pending).trim_end(), out)
    }
}

/// Handle one SSE line (`data: {...}`), appending any content delta to `out`.
fn process_sse_line(line: &str, out: &mut String) -> Result<(), GenerateError> {
    if line.is_empty() {
        return Ok(());
    }
    let data_str = match line.strip_prefix("data: ") {
        Some(d) => d,
        None => return Ok(()),
    };
    if data_str == "[DONE]" {
        return Ok(());
    }
    let data: Value = match serde_json::from_str(data_str) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    if let Some(message) = data["error"]["message"].as_str() {
        return Err(GenerateError::Stream(message.to_string()));
    }
    if let Some(content) = data["choices"][0]["delta"]["content"].as_str() {
        out.push_str(content);
    }
    Ok(())
}
