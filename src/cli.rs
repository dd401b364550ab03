//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::Platform;
use clap::Parser;
use std::path::PathBuf;

/// ReviewLens - LLM-powered app store review analyzer
///
/// Runs sentiment, issue, feature request, monetization and action analysis
/// over a set of app reviews and merges the results into one report.
///
/// Examples:
///   reviewlens --app-url https://apps.apple.com/us/app/example/id123456789 --reviews reviews.json
///   reviewlens --app-url https://play.google.com/store/apps/details?id=com.example --reviews reviews.json --format json
///   reviewlens --app-url https://apps.apple.com/us/app/example/id123456789 --reviews reviews.json --dry-run
///   reviewlens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// App Store or Google Play URL of the app to analyze
    #[arg(short, long, value_name = "URL", required_unless_present = "init_config")]
    pub app_url: Option<String>,

    /// JSON file holding the exported reviews
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub reviews: Option<PathBuf>,

    /// Review locale to analyze
    #[arg(long, default_value = "en-US")]
    pub locale: String,

    /// Maximum number of reviews to analyze
    ///
    /// Defaults to the configured default review limit.
    #[arg(short, long, value_name = "COUNT")]
    pub limit: Option<u32>,

    /// Expected platform; must match the app URL
    #[arg(long, value_enum)]
    pub platform: Option<PlatformArg>,

    /// Token budget for this analysis
    #[arg(long, value_name = "TOKENS")]
    pub budget: Option<u64>,

    /// Ollama model to use for analysis
    #[arg(short, long, env = "REVIEWLENS_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Per-call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retries after a timeout or rate limit
    #[arg(long, value_name = "NUM")]
    pub retries: Option<u32>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .reviewlens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Keep cached pipeline results in memory only
    #[arg(long)]
    pub no_cache: bool,

    /// Dry run: load the reviews and print rating statistics without calling the LLM
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when any report section is unavailable
    #[arg(long)]
    pub fail_on_degraded: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .reviewlens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Platform flag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PlatformArg {
    Ios,
    Android,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Ios => Platform::Ios,
            PlatformArg::Android => Platform::Android,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        let url = self.app_url.as_deref().unwrap_or("");
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err("App URL must start with 'https://' or 'http://'".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref path) = self.reviews {
            if !path.is_file() {
                return Err(format!("Reviews file does not exist: {}", path.display()));
            }
        }

        if self.limit == Some(0) {
            return Err("Limit must be at least 1".to_string());
        }

        if self.budget == Some(0) {
            return Err("Budget must be at least 1 token".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
