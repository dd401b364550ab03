//! Ollama chat backend.

use super::{extract_json, ModelBackend, ModelRequest, ModelResponse};
use crate::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Connection settings for Ollama.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 30,
        }
    }
}

impl From<&crate::config::ModelConfig> for OllamaConfig {
    fn from(config: &crate::config::ModelConfig) -> Self {
        Self {
            ollama_url: config.ollama_url.clone(),
            model_name: config.name.clone(),
            temperature: config.temperature,
            timeout_seconds: config.timeout_seconds,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'a Value,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Sends pipeline prompts to a local or remote Ollama server.
pub struct OllamaBackend {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let body = OllamaChatRequest {
            model: &self.config.model_name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream: false,
            format: &request.schema,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!(pipeline = %request.kind, "Sending chat request to {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(self.config.timeout_seconds)
                } else if e.is_connect() {
                    ModelError::Upstream(format!(
                        "Cannot connect to Ollama at {}",
                        self.config.ollama_url
                    ))
                } else {
                    ModelError::Upstream(format!("Failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Upstream(format!(
                "Ollama API error {}: {}",
                status, text
            )));
        }

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(self.config.timeout_seconds)
            } else {
                ModelError::Upstream(format!("Failed to parse Ollama response: {}", e))
            }
        })?;

        let payload = extract_json(&chat_response.message.content)?;
        let token_cost = chat_response.prompt_eval_count + chat_response.eval_count;

        debug!(pipeline = %request.kind, token_cost, "Received model response");

        Ok(ModelResponse {
            payload,
            token_cost,
        })
    }
}
