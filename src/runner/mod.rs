//! Pipeline runner.
//!
//! Runs every pipeline over a corpus concurrently, under one per-job token
//! budget, through the shared result cache. A pipeline that fails is recorded
//! as failed; it never cancels the others.

pub mod budget;
pub mod retry;

pub use budget::TokenBudget;
pub use retry::CallPolicy;

use crate::cache::{fingerprint, ResultCache};
use crate::config::Config;
use crate::error::FailureReason;
use crate::llm::ModelBackend;
use crate::models::{PipelineKind, PipelineOutcome, PipelineResult, ReviewCorpus};
use crate::pipelines::{self, PipelineContext, PipelineSettings};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub pipeline: PipelineSettings,
    pub cache_ttl: Duration,
    /// Pipelines to run, in no particular order.
    pub kinds: Vec<PipelineKind>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings::default(),
            cache_ttl: Duration::from_secs(86_400),
            kinds: PipelineKind::ALL.to_vec(),
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pipeline: PipelineSettings {
                batch_size: config.analysis.batch_size,
                max_output_tokens: config.model.max_output_tokens,
                policy: CallPolicy::from(&config.model),
            },
            cache_ttl: config.cache.ttl(),
            kinds: PipelineKind::ALL.to_vec(),
        }
    }
}

/// Every pipeline's outcome for one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: BTreeMap<PipelineKind, PipelineOutcome>,
    /// Tokens actually spent in this run, including by pipelines that failed.
    pub total_cost: u64,
}

impl RunReport {
    pub fn all_failed(&self) -> bool {
        self.results.values().all(|outcome| outcome.is_err())
    }
}

pub struct PipelineRunner {
    backend: Arc<dyn ModelBackend>,
    cache: Arc<ResultCache>,
    settings: RunnerSettings,
}

impl PipelineRunner {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        cache: Arc<ResultCache>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            backend,
            cache,
            settings,
        }
    }

    pub fn kinds(&self) -> &[PipelineKind] {
        &self.settings.kinds
    }

    #[cfg(test)]
    pub async fn run(&self, corpus: Arc<ReviewCorpus>, budget: TokenBudget) -> RunReport {
        self.run_with_events(corpus, budget, None).await
    }

    /// Run all configured pipelines and wait for every one of them, sending
    /// each pipeline's kind on `events` as soon as it settles.
    pub async fn run_with_events(
        &self,
        corpus: Arc<ReviewCorpus>,
        budget: TokenBudget,
        events: Option<UnboundedSender<PipelineKind>>,
    ) -> RunReport {
        let budget = Arc::new(budget);

        info!(
            app_id = corpus.app_id(),
            reviews = corpus.len(),
            budget = budget.limit(),
            "Running {} pipelines",
            self.settings.kinds.len()
        );

        // Spawned tasks keep running if this future is dropped, so an
        // abandoned job still finishes and caches its pipelines.
        let mut pending: FuturesUnordered<_> = self
            .settings
            .kinds
            .iter()
            .map(|&kind| {
                let task = PipelineTask {
                    kind,
                    corpus: corpus.clone(),
                    backend: self.backend.clone(),
                    cache: self.cache.clone(),
                    budget: budget.clone(),
                    settings: self.settings.pipeline.clone(),
                    cache_ttl: self.settings.cache_ttl,
                };
                let handle = tokio::spawn(task.execute());
                async move { (kind, handle.await) }
            })
            .collect();

        let mut results = BTreeMap::new();
        while let Some((kind, joined)) = pending.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(FailureReason::upstream(format!("pipeline task aborted: {}", e)))
            });
            results.insert(kind, outcome);
            if let Some(events) = &events {
                let _ = events.send(kind);
            }
        }

        let total_cost = budget.spent();
        let failed = results.values().filter(|o| o.is_err()).count();
        info!(total_cost, failed, "Pipelines settled");

        RunReport {
            results,
            total_cost,
        }
    }
}

/// One pipeline's unit of work, owned so it can be spawned.
struct PipelineTask {
    kind: PipelineKind,
    corpus: Arc<ReviewCorpus>,
    backend: Arc<dyn ModelBackend>,
    cache: Arc<ResultCache>,
    budget: Arc<TokenBudget>,
    settings: PipelineSettings,
    cache_ttl: Duration,
}

impl PipelineTask {
    async fn execute(self) -> PipelineOutcome {
        let kind = self.kind;
        let model_version = pipelines::model_version(self.backend.model_name(), kind);
        let fp = fingerprint(&self.corpus, kind, &model_version);

        let _guard = self.cache.lock(&fp).await;

        if let Some(entry) = self.cache.get(&fp).await {
            if entry.payload.kind() == kind {
                info!(pipeline = %kind, fingerprint = %fp, "Cache hit");
                return Ok(PipelineResult {
                    payload: entry.payload,
                    token_cost: 0,
                    cache_hit: true,
                });
            }
            warn!(pipeline = %kind, fingerprint = %fp, "Cached payload has the wrong kind, recomputing");
        } else {
            debug!(pipeline = %kind, fingerprint = %fp, "Cache miss");
        }

        let ctx = PipelineContext::new(self.backend, self.budget, self.settings);
        match pipelines::analyze(kind, &ctx, &self.corpus).await {
            Ok(payload) => {
                let token_cost = ctx.spent();
                self.cache
                    .put(&fp, payload.clone(), token_cost, self.cache_ttl)
                    .await;
                info!(pipeline = %kind, token_cost, "Pipeline succeeded");
                Ok(PipelineResult {
                    payload,
                    token_cost,
                    cache_hit: false,
                })
            }
            Err(reason) => {
                warn!(pipeline = %kind, spent = ctx.spent(), "Pipeline failed: {}", reason);
                Err(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::models::Platform;
    use crate::testing::{mixed_reviews, Behavior, ScriptedBackend, FIXTURE_COST};
    use serde_json::json;

    fn corpus() -> Arc<ReviewCorpus> {
        Arc::new(ReviewCorpus::new("389801252", Platform::Ios, "en-US", mixed_reviews()))
    }

    fn settings() -> RunnerSettings {
        RunnerSettings {
            pipeline: PipelineSettings {
                batch_size: 100,
                max_output_tokens: 500,
                policy: CallPolicy {
                    timeout: Duration::from_millis(200),
                    retries: 2,
                    backoff: Duration::from_millis(1),
                },
            },
            ..RunnerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_all_pipelines_succeed() {
        let backend = Arc::new(ScriptedBackend::new());
        let runner = PipelineRunner::new(backend.clone(), Arc::new(ResultCache::in_memory()), settings());

        let report = runner.run(corpus(), TokenBudget::unlimited()).await;

        assert_eq!(report.results.len(), 5);
        assert!(report.results.values().all(|o| o.is_ok()));
        assert_eq!(report.total_cost, 5 * FIXTURE_COST);
        assert_eq!(backend.total_calls(), 5);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_cancel_others() {
        let backend = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Monetization,
            Behavior::Fail(ModelError::Upstream("500 Internal Server Error".to_string())),
        ));
        let runner = PipelineRunner::new(backend, Arc::new(ResultCache::in_memory()), settings());

        let report = runner.run(corpus(), TokenBudget::unlimited()).await;

        assert!(matches!(
            report.results[&PipelineKind::Monetization],
            Err(FailureReason::UpstreamError { .. })
        ));
        let ok = report.results.values().filter(|o| o.is_ok()).count();
        assert_eq!(ok, 4);
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let backend = Arc::new(ScriptedBackend::new());
        let cache = Arc::new(ResultCache::in_memory());
        let runner = PipelineRunner::new(backend.clone(), cache, settings());

        let first = runner.run(corpus(), TokenBudget::unlimited()).await;
        let second = runner.run(corpus(), TokenBudget::unlimited()).await;

        assert!(first.results.values().all(|o| !o.as_ref().unwrap().cache_hit));
        for outcome in second.results.values() {
            let result = outcome.as_ref().unwrap();
            assert!(result.cache_hit);
            assert_eq!(result.token_cost, 0);
        }
        assert_eq!(second.total_cost, 0);
        assert_eq!(backend.total_calls(), 5);

        // Same payloads either way.
        for kind in PipelineKind::ALL {
            assert_eq!(
                first.results[&kind].as_ref().unwrap().payload,
                second.results[&kind].as_ref().unwrap().payload
            );
        }
    }

    #[tokio::test]
    async fn test_abandoned_run_still_caches() {
        let backend = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Issues,
            Behavior::Slow {
                delay: Duration::from_millis(100),
                payload: crate::testing::fixture_payload(PipelineKind::Issues),
                cost: FIXTURE_COST,
            },
        ));
        let runner = PipelineRunner::new(backend.clone(), Arc::new(ResultCache::in_memory()), settings());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            runner.run(corpus(), TokenBudget::unlimited()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let report = runner.run(corpus(), TokenBudget::unlimited()).await;

        assert_eq!(report.results.len(), 5);
        assert!(report
            .results
            .values()
            .all(|o| o.as_ref().map(|r| r.cache_hit).unwrap_or(false)));
        assert_eq!(backend.total_calls(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_work() {
        let backend = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Sentiment,
            Behavior::Slow {
                delay: Duration::from_millis(50),
                payload: crate::testing::fixture_payload(PipelineKind::Sentiment),
                cost: FIXTURE_COST,
            },
        ));
        let runner = PipelineRunner::new(backend.clone(), Arc::new(ResultCache::in_memory()), settings());

        let (first, second) = tokio::join!(
            runner.run(corpus(), TokenBudget::unlimited()),
            runner.run(corpus(), TokenBudget::unlimited()),
        );

        assert!(first.results.values().all(|o| o.is_ok()));
        assert!(second.results.values().all(|o| o.is_ok()));
        assert_eq!(backend.total_calls(), 5);
        assert_eq!(first.total_cost + second.total_cost, 5 * FIXTURE_COST);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = Arc::new(ResultCache::in_memory());
        let failing = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Issues,
            Behavior::Respond {
                payload: json!({"issues": "none"}),
                cost: 50,
            },
        ));
        let runner = PipelineRunner::new(failing, cache.clone(), settings());
        let report = runner.run(corpus(), TokenBudget::unlimited()).await;
        assert!(matches!(
            report.results[&PipelineKind::Issues],
            Err(FailureReason::SchemaError { .. })
        ));

        let healthy = Arc::new(ScriptedBackend::new());
        let runner = PipelineRunner::new(healthy.clone(), cache, settings());
        let report = runner.run(corpus(), TokenBudget::unlimited()).await;

        let issues = report.results[&PipelineKind::Issues].as_ref().unwrap();
        assert!(!issues.cache_hit);
        assert_eq!(healthy.calls(PipelineKind::Issues), 1);
        assert_eq!(healthy.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_skips_every_pipeline() {
        let backend = Arc::new(ScriptedBackend::new());
        let runner = PipelineRunner::new(backend.clone(), Arc::new(ResultCache::in_memory()), settings());

        let report = runner.run(corpus(), TokenBudget::new(0)).await;

        assert!(report.all_failed());
        assert!(report
            .results
            .values()
            .all(|o| matches!(o, Err(FailureReason::BudgetExceeded { .. }))));
        assert_eq!(backend.total_calls(), 0);
        assert_eq!(report.total_cost, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let backend = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Sentiment,
            Behavior::FlakyThen {
                failures: 1,
                error: ModelError::RateLimited,
                payload: crate::testing::fixture_payload(PipelineKind::Sentiment),
                cost: 80,
            },
        ));
        let runner = PipelineRunner::new(backend.clone(), Arc::new(ResultCache::in_memory()), settings());

        let report = runner.run(corpus(), TokenBudget::unlimited()).await;

        let sentiment = report.results[&PipelineKind::Sentiment].as_ref().unwrap();
        assert_eq!(sentiment.token_cost, 80);
        assert_eq!(backend.calls(PipelineKind::Sentiment), 2);
    }

    #[tokio::test]
    async fn test_events_fire_once_per_pipeline() {
        let runner = PipelineRunner::new(
            Arc::new(ScriptedBackend::new()),
            Arc::new(ResultCache::in_memory()),
            settings(),
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        runner.run_with_events(corpus(), TokenBudget::unlimited(), Some(tx)).await;

        let mut seen = Vec::new();
        while let Some(kind) = rx.recv().await {
            seen.push(kind);
        }
        seen.sort();
        assert_eq!(seen, PipelineKind::ALL.to_vec());
    }
}
