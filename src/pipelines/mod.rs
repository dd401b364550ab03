//! Analysis pipelines.
//!
//! Each pipeline turns a review corpus into one typed payload through one or
//! more model calls. Pipelines share a [`PipelineContext`] that owns the call
//! policy and the job's token budget; they never see each other's results.

pub mod actions;
pub mod features;
pub mod issues;
pub mod monetization;
pub mod sentiment;

use crate::error::FailureReason;
use crate::llm::{ModelBackend, ModelRequest};
use crate::models::{PipelineKind, PipelinePayload, Review, ReviewCorpus};
use crate::runner::budget::TokenBudget;
use crate::runner::retry::{call_with_retry, CallPolicy};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Prompt version shared by all pipelines; bump it when a prompt changes.
pub const PROMPT_VERSION: &str = "1.0";

/// Model version string used in cache fingerprints.
pub fn model_version(model_name: &str, kind: PipelineKind) -> String {
    format!("{}/{}@{}", model_name, kind, PROMPT_VERSION)
}

/// Knobs shared by every pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Reviews per model call.
    pub batch_size: usize,
    /// Output tokens requested (and reserved) per call.
    pub max_output_tokens: u32,
    pub policy: CallPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_output_tokens: 1000,
            policy: CallPolicy::default(),
        }
    }
}

/// Everything one pipeline run needs to talk to the model.
pub struct PipelineContext {
    backend: Arc<dyn ModelBackend>,
    budget: Arc<TokenBudget>,
    settings: PipelineSettings,
    spent: AtomicU64,
}

impl PipelineContext {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        budget: Arc<TokenBudget>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            backend,
            budget,
            settings,
            spent: AtomicU64::new(0),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.settings.batch_size.max(1)
    }

    /// Tokens spent by this pipeline so far.
    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::Acquire)
    }

    /// One budgeted model call: reserve, call under the retry policy, settle.
    pub async fn invoke(
        &self,
        kind: PipelineKind,
        system: &str,
        prompt: String,
        schema: Value,
    ) -> Result<Value, FailureReason> {
        let request = ModelRequest {
            kind,
            system: system.to_string(),
            prompt,
            schema,
            max_tokens: self.settings.max_output_tokens,
        };

        let needed = request.estimated_prompt_tokens() + request.max_tokens as u64;
        let reservation = self.budget.try_reserve(needed)?;

        match call_with_retry(self.backend.as_ref(), &request, &self.settings.policy).await {
            Ok(response) => {
                self.budget.settle(reservation, response.token_cost);
                self.spent.fetch_add(response.token_cost, Ordering::AcqRel);
                debug!(pipeline = %kind, token_cost = response.token_cost, "Model call settled");
                Ok(response.payload)
            }
            Err(err) => {
                self.budget.release(reservation);
                Err(err.into())
            }
        }
    }
}

/// Run the pipeline for `kind` over the corpus.
pub async fn analyze(
    kind: PipelineKind,
    ctx: &PipelineContext,
    corpus: &ReviewCorpus,
) -> Result<PipelinePayload, FailureReason> {
    if corpus.is_empty() {
        return Err(FailureReason::upstream("no reviews to analyze"));
    }

    let payload = match kind {
        PipelineKind::Sentiment => PipelinePayload::Sentiment(sentiment::analyze(ctx, corpus).await?),
        PipelineKind::Issues => PipelinePayload::Issues(issues::analyze(ctx, corpus).await?),
        PipelineKind::Features => PipelinePayload::Features(features::analyze(ctx, corpus).await?),
        PipelineKind::Monetization => {
            PipelinePayload::Monetization(monetization::analyze(ctx, corpus).await?)
        }
        PipelineKind::Actions => PipelinePayload::Actions(actions::analyze(ctx, corpus).await?),
    };
    Ok(payload)
}

/// Render reviews as a numbered prompt block.
pub(crate) fn format_reviews(reviews: &[Review]) -> String {
    let mut block = String::new();
    for (i, review) in reviews.iter().enumerate() {
        block.push_str(&format!(
            "{}. [{}★] {}\n",
            i + 1,
            review.rating,
            review.text().replace('\n', " ")
        ));
    }
    block
}

/// Decode a model payload into the pipeline's raw output shape.
pub(crate) fn decode<T: DeserializeOwned>(kind: PipelineKind, value: Value) -> Result<T, FailureReason> {
    serde_json::from_value(value).map_err(|e| FailureReason::schema_for(kind, e))
}

/// Reject blank names; returns the trimmed name.
pub(crate) fn require_name(kind: PipelineKind, field: &str, value: &str) -> Result<String, FailureReason> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FailureReason::schema_for(kind, format!("empty {}", field)));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn category_or_default(category: Option<String>) -> String {
    match category {
        Some(c) if !c.trim().is_empty() => c.trim().to_lowercase(),
        _ => "other".to_string(),
    }
}

/// Items merged by case-insensitive name, kept in first-seen order.
pub(crate) struct NameMerger<T> {
    items: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> NameMerger<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert `item` under `name`, or fold it into the existing entry.
    pub fn merge(&mut self, name: &str, item: T, fold: impl FnOnce(&mut T, T)) {
        let key = name.trim().to_lowercase();
        match self.index.get(&key) {
            Some(&i) => fold(&mut self.items[i], item),
            None => {
                self.index.insert(key, self.items.len());
                self.items.push(item);
            }
        }
    }

    /// Merged items in first-seen order.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Stable descending sort by `rank`, so ties keep first-seen order.
    pub fn ranked_by<K: Ord>(self, rank: impl Fn(&T) -> K, limit: usize) -> Vec<T> {
        let mut items = self.items;
        items.sort_by(|a, b| rank(b).cmp(&rank(a)));
        items.truncate(limit);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use crate::testing::{review, Behavior, ScriptedBackend};
    use serde_json::json;

    #[test]
    fn test_model_version_format() {
        assert_eq!(
            model_version("llama3.2:latest", PipelineKind::Issues),
            "llama3.2:latest/issues@1.0"
        );
    }

    #[test]
    fn test_name_merger_keeps_first_seen_on_ties() {
        let mut merger = NameMerger::new();
        merger.merge("Login", ("Login", 2), |a, b| a.1 += b.1);
        merger.merge("Crash", ("Crash", 3), |a, b| a.1 += b.1);
        merger.merge(" login ", ("login", 1), |a, b| a.1 += b.1);
        merger.merge("Ads", ("Ads", 3), |a, b| a.1 += b.1);

        let ranked = merger.ranked_by(|item| item.1, 10);
        assert_eq!(ranked, vec![("Login", 3), ("Crash", 3), ("Ads", 3)]);
    }

    #[test]
    fn test_name_merger_truncates() {
        let mut merger = NameMerger::new();
        for i in 0..5u32 {
            merger.merge(&format!("item {}", i), i, |a, b| *a += b);
        }
        assert_eq!(merger.ranked_by(|n| *n, 2), vec![4, 3]);
    }

    #[test]
    fn test_format_reviews() {
        let block = format_reviews(&[review(1, "Crashes\non launch"), review(5, "Great")]);
        assert_eq!(block, "1. [1★] Crashes on launch\n2. [5★] Great\n");
    }

    #[tokio::test]
    async fn test_invoke_settles_budget() {
        let backend = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Issues,
            Behavior::Respond {
                payload: json!({"issues": []}),
                cost: 120,
            },
        ));
        let budget = Arc::new(TokenBudget::new(10_000));
        let ctx = PipelineContext::new(backend, budget.clone(), PipelineSettings::default());

        let value = ctx
            .invoke(PipelineKind::Issues, "system", "prompt".to_string(), json!({}))
            .await
            .unwrap();

        assert_eq!(value, json!({"issues": []}));
        assert_eq!(ctx.spent(), 120);
        assert_eq!(budget.spent(), 120);
        assert_eq!(budget.remaining(), 10_000 - 120);
    }

    #[tokio::test]
    async fn test_invoke_skips_when_budget_short() {
        let backend = Arc::new(ScriptedBackend::new());
        let budget = Arc::new(TokenBudget::new(100));
        let ctx = PipelineContext::new(backend.clone(), budget, PipelineSettings::default());

        let err = ctx
            .invoke(PipelineKind::Issues, "system", "prompt".to_string(), json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, FailureReason::BudgetExceeded { remaining: 100, .. }));
        assert_eq!(backend.calls(PipelineKind::Issues), 0);
    }

    #[tokio::test]
    async fn test_invoke_releases_on_failure() {
        let backend = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Issues,
            Behavior::Fail(crate::error::ModelError::Upstream("boom".to_string())),
        ));
        let budget = Arc::new(TokenBudget::new(5_000));
        let ctx = PipelineContext::new(backend, budget.clone(), PipelineSettings::default());

        let err = ctx
            .invoke(PipelineKind::Issues, "system", "prompt".to_string(), json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, FailureReason::UpstreamError { .. }));
        assert_eq!(budget.remaining(), 5_000);
        assert_eq!(budget.spent(), 0);
    }

    #[tokio::test]
    async fn test_analyze_dispatches_by_kind() {
        let backend = Arc::new(ScriptedBackend::new().with(
            PipelineKind::Features,
            Behavior::Respond {
                payload: json!({"features": [{"feature": "Dark mode", "count": 1, "category": "ui"}]}),
                cost: 10,
            },
        ));
        let ctx = PipelineContext::new(
            backend,
            Arc::new(TokenBudget::unlimited()),
            PipelineSettings::default(),
        );
        let corpus = ReviewCorpus::new("1", Platform::Ios, "en-US", vec![review(3, "please add dark mode")]);

        let payload = analyze(PipelineKind::Features, &ctx, &corpus).await.unwrap();
        assert_eq!(payload.kind(), PipelineKind::Features);
    }
}
