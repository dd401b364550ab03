//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.reviewlens.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = ".reviewlens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Analysis limits and batching.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "review_report.md".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Retries after a timeout or rate limit.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Initial retry backoff, doubled on every attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Output tokens reserved from the budget for each call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_max_output_tokens() -> u32 {
    1000
}

/// Analysis limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Token ceiling per job across all pipeline calls.
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,

    /// Review limit used when the caller does not pass one.
    #[serde(default = "default_review_limit")]
    pub default_review_limit: u32,

    /// Largest review limit a job may request.
    #[serde(default = "default_max_review_limit")]
    pub max_review_limit: u32,

    /// Reviews sent per model call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Locales a job may request.
    #[serde(default = "default_locales")]
    pub supported_locales: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            default_review_limit: default_review_limit(),
            max_review_limit: default_max_review_limit(),
            batch_size: default_batch_size(),
            supported_locales: default_locales(),
        }
    }
}

fn default_token_budget() -> u64 {
    50_000
}

fn default_review_limit() -> u32 {
    500
}

fn default_max_review_limit() -> u32 {
    1000
}

fn default_batch_size() -> usize {
    50
}

fn default_locales() -> Vec<String> {
    vec!["en-US".to_string(), "en-GB".to_string()]
}

/// Where cached pipeline results live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Disk,
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    /// Directory used by the disk backend.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Entry lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            dir: default_cache_dir(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Disk
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".reviewlens-cache")
}

fn default_cache_ttl() -> u64 {
    86_400
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings. Optional flags
    /// only override when given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(retries) = args.retries {
            self.model.retries = retries;
        }
        if let Some(budget) = args.budget {
            self.analysis.token_budget = budget;
        }
        if args.no_cache {
            self.cache.backend = CacheBackend::Memory;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "llama3.2:latest");
        assert_eq!(config.model.retries, 2);
        assert_eq!(config.model.timeout_seconds, 30);
        assert_eq!(config.analysis.token_budget, 50_000);
        assert_eq!(config.analysis.batch_size, 50);
        assert_eq!(config.cache.backend, CacheBackend::Disk);
        assert!(config.analysis.supported_locales.contains(&"en-US".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"
verbose = true

[model]
name = "qwen2.5:14b"
temperature = 0.2
retries = 4

[analysis]
token_budget = 20000
supported_locales = ["de-DE"]

[cache]
backend = "memory"
ttl_seconds = 60
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert!(config.general.verbose);
        assert_eq!(config.model.name, "qwen2.5:14b");
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.model.retries, 4);
        assert_eq!(config.model.backoff_ms, 500);
        assert_eq!(config.analysis.token_budget, 20_000);
        assert_eq!(config.analysis.supported_locales, vec!["de-DE"]);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[analysis]\nbatch_size = 10\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.analysis.batch_size, 10);
        assert_eq!(config.analysis.max_review_limit, 1000);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[model\nname = ").unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[analysis]"));
        assert!(toml_str.contains("[cache]"));
    }
}
