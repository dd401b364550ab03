//! ReviewLens - LLM-powered app store review analyzer
//!
//! A CLI tool that runs sentiment, issue, feature request, monetization and
//! action analysis over app reviews using Ollama, and merges the results into
//! a single report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, fetch failure, failed job, etc.)
//!   2 - Report is degraded and --fail-on-degraded was set

mod analysis;
mod cache;
mod cli;
mod config;
mod error;
mod jobs;
mod llm;
mod models;
mod pipelines;
mod report;
mod reviews;
mod runner;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use cache::{DiskStore, ResultCache};
use cli::{Args, OutputFormat};
use config::{CacheBackend, Config, CONFIG_FILE_NAME};
use indicatif::{ProgressBar, ProgressStyle};
use jobs::{AnalysisService, JobLimits, JobManager};
use llm::{OllamaBackend, OllamaConfig};
use models::{AnalysisOptions, JobStatus, Report};
use reviews::{parse_app_url, FetchRequest, JsonFileFetcher, ReviewFetcher};
use runner::{PipelineRunner, RunnerSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("ReviewLens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_analysis(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Analysis failed: {}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: write a default config file.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the model, budget, locales and cache.");
    Ok(())
}

fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run one analysis job end to end. Returns the exit code.
async fn run_analysis(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let app_url = args.app_url.clone().context("--app-url is required")?;
    let reviews_path = args.reviews.clone().context("--reviews is required")?;
    let fetcher: Arc<dyn ReviewFetcher> = Arc::new(JsonFileFetcher::new(reviews_path));
    let review_limit = args.limit.unwrap_or(config.analysis.default_review_limit);

    if args.dry_run {
        return handle_dry_run(fetcher.as_ref(), &app_url, &args.locale, review_limit).await;
    }

    println!("🤖 Initializing analysis engine...");
    println!("   Model: {}", config.model.name);
    println!("   Ollama: {}", config.model.ollama_url);
    println!("   Token budget: {}", config.analysis.token_budget);
    println!(
        "   Timeout: {}s, retries: {}",
        config.model.timeout_seconds, config.model.retries
    );

    let service = build_service(&config, fetcher)?;

    let options = AnalysisOptions {
        locale: args.locale.clone(),
        review_limit,
        platform: args.platform.map(Into::into),
        token_budget: args.budget,
    };

    println!("\n🔬 Analyzing reviews for {}", app_url);
    let job_id = service.create_job(&app_url, options).await?;
    info!(job_id = %job_id, "Job created");

    let status = wait_for_job(&service, job_id, args.quiet).await?;
    if status.status == JobStatus::Failed {
        let reason = status.error.unwrap_or_else(|| "unknown error".to_string());
        eprintln!("\n❌ Analysis job failed: {}", reason);
        return Ok(1);
    }

    let report = service.get_result(job_id).await?;

    println!("\n📝 Generating report...");
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.general.output));
    report::write_report(&output, &output_path)?;

    print_summary(&report, start_time.elapsed());
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        output_path.display()
    );

    if args.fail_on_degraded && report.is_degraded() {
        eprintln!("\n⛔ Report is degraded. Failing (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Wire the cache, model backend, runner and job registry together.
fn build_service(config: &Config, fetcher: Arc<dyn ReviewFetcher>) -> Result<AnalysisService> {
    let cache = match config.cache.backend {
        CacheBackend::Memory => ResultCache::in_memory(),
        CacheBackend::Disk => {
            info!("Using disk cache at {}", config.cache.dir.display());
            ResultCache::new(Arc::new(DiskStore::new(config.cache.dir.clone())))
        }
    };

    let backend = OllamaBackend::new(OllamaConfig::from(&config.model))?;
    let runner = PipelineRunner::new(
        Arc::new(backend),
        Arc::new(cache),
        RunnerSettings::from_config(config),
    );

    let jobs = JobManager::new(JobLimits {
        supported_locales: config.analysis.supported_locales.clone(),
        max_review_limit: config.analysis.max_review_limit,
        reuse_ttl: config.cache.ttl(),
    });

    Ok(AnalysisService::new(
        Arc::new(jobs),
        fetcher,
        Arc::new(runner),
        config.analysis.token_budget,
    ))
}

/// Poll the job until it reaches a terminal state, mirroring progress on a bar.
async fn wait_for_job(
    service: &AnalysisService,
    job_id: models::JobId,
    quiet: bool,
) -> Result<models::JobStatusView> {
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    loop {
        let view = service.get_status(job_id).await?;
        pb.set_position(view.progress as u64);
        pb.set_message(view.status.to_string());

        if view.status.is_terminal() {
            if view.status == JobStatus::Completed {
                pb.finish_with_message("done");
            } else {
                pb.abandon_with_message("failed");
            }
            return Ok(view);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn print_summary(report: &Report, elapsed: Duration) {
    println!("\n📊 Analysis Summary:");
    println!("   Reviews analyzed: {}", report.reviews_analyzed);
    println!("   Average rating: {:.1}★", report.ratings.average);
    if let Some(sentiment) = report.sentiment.data() {
        println!(
            "   Sentiment: {} (😀 {}% | 😐 {}% | 😞 {}%)",
            sentiment.overall,
            sentiment.breakdown.positive,
            sentiment.breakdown.neutral,
            sentiment.breakdown.negative
        );
    }
    if let Some(issues) = report.issues.data() {
        println!("   Issues: {}", issues.len());
    }
    if let Some(features) = report.features.data() {
        println!("   Feature requests: {}", features.len());
    }
    if report.is_degraded() {
        let names: Vec<&str> = report.degraded.iter().map(|k| k.as_str()).collect();
        println!("   ⚠️  Unavailable sections: {}", names.join(", "));
    }
    println!("   Tokens used: {}", report.total_token_cost);
    println!("   Duration: {:.1}s", elapsed.as_secs_f64());
}

/// Handle --dry-run: load the reviews and print rating stats without calling the model.
async fn handle_dry_run(
    fetcher: &dyn ReviewFetcher,
    app_url: &str,
    locale: &str,
    limit: u32,
) -> Result<i32> {
    println!("\n🔍 Dry run: loading reviews (no LLM call)...\n");

    let app = parse_app_url(app_url)?;
    let request = FetchRequest {
        app_url: app_url.to_string(),
        app_id: app.app_id.clone(),
        platform: app.platform,
        locale: locale.to_string(),
        limit,
    };
    let corpus = fetcher.fetch(&request).await?;
    let stats = corpus.rating_stats();

    println!("   App: {} ({})", app.app_id, app.platform);
    println!("   Reviews: {} ({})", corpus.len(), corpus.locale());
    println!("   Average rating: {:.2}★", stats.average);
    for (i, count) in stats.distribution.iter().enumerate().rev() {
        println!("     {}★  {}", i + 1, count);
    }
    println!("   1-2★ share: {}%", stats.low_star_share);

    println!("\n✅ Dry run complete. No LLM calls were made.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
