//! Model-call backends.
//!
//! Pipelines talk to the model through [`ModelBackend`], which takes a prompt
//! plus the JSON schema the answer must follow and returns the decoded payload
//! with its token cost.

pub mod ollama;

pub use ollama::{OllamaBackend, OllamaConfig};

use crate::error::ModelError;
use crate::models::PipelineKind;
use async_trait::async_trait;
use serde_json::Value;

/// One model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Pipeline issuing the call (for logging and routing).
    pub kind: PipelineKind,
    pub system: String,
    pub prompt: String,
    /// JSON schema the output is expected to follow.
    pub schema: Value,
    pub max_tokens: u32,
}

impl ModelRequest {
    /// Rough token estimate for the prompt side of the call.
    pub fn estimated_prompt_tokens(&self) -> u64 {
        ((self.system.len() + self.prompt.len()) as u64).div_ceil(4)
    }
}

/// Decoded model answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub payload: Value,
    pub token_cost: u64,
}

/// A model provider.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Identifies the model; part of every cache fingerprint.
    fn model_name(&self) -> &str;

    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Pull a JSON document out of model text, tolerating markdown fences.
pub fn extract_json(content: &str) -> Result<Value, ModelError> {
    let trimmed = content.trim();
    let candidate = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.split("```").next().unwrap_or(rest)
    } else if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        rest.split("```").next().unwrap_or(rest)
    } else {
        trimmed
    };

    serde_json::from_str(candidate.trim()).map_err(|e| ModelError::Schema(e.to_string()))
}
