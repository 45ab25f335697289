//! OpenRouter chat-completions client.
//!
//! Speaks the OpenAI-compatible `/chat/completions` API. Failures are passed
//! through as [`ServiceError`] with the status, the response body and any
//! `Retry-After` header so the invoker can classify them.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use specweaver_shared::{OpenRouterConfig, Result, SpecWeaverError};
use tracing::debug;
use url::Url;

use crate::generator::{Generator, ServiceError};

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("SpecWeaver/", env!("CARGO_PKG_VERSION"));

/// Sampling temperature for extraction work.
const TEMPERATURE: f32 = 0.2;

pub struct OpenRouterGenerator {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl OpenRouterGenerator {
    pub fn new(config: &OpenRouterConfig, api_key: impl Into<String>) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("chat/completions"))
            .map_err(|e| {
                SpecWeaverError::config(format!("invalid base_url {:?}: {e}", config.base_url))
            })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SpecWeaverError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: config.default_model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Generator for OpenRouterGenerator {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: TEMPERATURE,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.trim())
            .header("X-Title", "SpecWeaver")
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::transport(format!("request failed: {e}")))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let mut error = ServiceError::http(status.as_u16(), text);
            error.retry_after = retry_after;
            return Err(error);
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            ServiceError::http(status.as_u16(), format!("unreadable completion ({e}): {text}"))
        })?;

        // Upstream provider errors can arrive with a 200 status.
        if let Some(error) = parsed.error {
            let mut service_error = ServiceError {
                status: error.code,
                message: error.message,
                retry_after,
            };
            if let Some(metadata) = error.metadata {
                service_error.message = format!("{} ({metadata})", service_error.message);
            }
            return Err(service_error);
        }

        let content = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ServiceError::http(status.as_u16(), "completion had no content"))?;

        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    message: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}
