//! Model gateway for the Gemini Generative Language API.
//!
//! A single synchronous `generateContent` call per prompt. No retry policy
//! lives here: callers decide whether a [`GatewayError`] is fatal to the
//! current request or has a textual fallback. The gateway never touches
//! the conversation log.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::config::{self, Config};
use crate::error::GatewayError;
use crate::prompt::PromptPayload;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const USER_AGENT: &str = concat!("snapfix/", env!("CARGO_PKG_VERSION"));

/// Outbound text-generation seam. The pipeline is generic over this so
/// tests can script model behavior.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        prompt: &PromptPayload,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

/// Gemini gateway configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl GeminiConfig {
    /// Resolves credentials from config and environment.
    ///
    /// API key: config value, then `GEMINI_API_KEY`.
    /// Base URL: `GEMINI_BASE_URL`, then config, then the public endpoint.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config::resolve_api_key(config.api_key.as_deref(), "GEMINI_API_KEY")?;
        anyhow::ensure!(
            HeaderValue::from_str(&api_key).is_ok(),
            "API key contains characters that cannot be sent in an HTTP header"
        );
        let base_url = config::resolve_base_url(
            config.base_url.as_deref(),
            "GEMINI_BASE_URL",
            DEFAULT_BASE_URL,
        );
        Ok(Self {
            api_key,
            base_url,
            model: config.model.clone(),
        })
    }
}

/// Gemini client.
pub struct GeminiGateway {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

impl TextGenerator for GeminiGateway {
    async fn generate(&self, prompt: &PromptPayload) -> Result<String, GatewayError> {
        let request = build_generate_request(prompt);
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );

        let response = self
            .http
            .post(&url)
            .headers(build_headers(&self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::http_status(status.as_u16(), &body));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::parse(format!("Invalid response JSON: {e}")))?;
        parse_generate_response(&value)
    }
}

/// Builds the `generateContent` request body: one user content entry with
/// the prompt text and, when present, an inline-data media part.
fn build_generate_request(prompt: &PromptPayload) -> Value {
    let mut parts = vec![json!({ "text": prompt.text })];
    if let Some(media) = &prompt.media {
        parts.push(json!({
            "inlineData": {
                "mimeType": media.mime_type,
                "data": BASE64.encode(&media.bytes),
            }
        }));
    }

    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }]
    })
}

/// Extracts the concatenated candidate text. An answer with no text parts
/// is an [`GatewayError::empty_response`], not a silent empty success.
fn parse_generate_response(value: &Value) -> Result<String, GatewayError> {
    let candidates = value
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut pieces = Vec::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str)
                && !text.trim().is_empty()
            {
                pieces.push(text.to_string());
            }
        }
    }

    let combined = pieces.join("\n");
    let trimmed = combined.trim();
    if trimmed.is_empty() {
        Err(GatewayError::empty_response())
    } else {
        Ok(trimmed.to_string())
    }
}

fn build_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-goog-api-key",
        HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("accept", HeaderValue::from_static("application/json"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}
