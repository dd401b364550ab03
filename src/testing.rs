//! Test doubles shared by unit tests across modules.

use crate::error::{FetchError, ModelError};
use crate::llm::{ModelBackend, ModelRequest, ModelResponse};
use crate::models::{PipelineKind, Review, ReviewCorpus};
use crate::reviews::{FetchRequest, ReviewFetcher};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub fn review(rating: u8, body: &str) -> Review {
    Review {
        rating,
        title: None,
        body: body.to_string(),
        date: None,
        locale: "en-US".to_string(),
    }
}

/// 60 five-star and 40 one-star reviews.
pub fn mixed_reviews() -> Vec<Review> {
    let mut reviews = Vec::new();
    reviews.extend((0..60).map(|i| review(5, &format!("Love it, works great {}", i))));
    reviews.extend((0..40).map(|i| review(1, &format!("Crashes every time I log in {}", i))));
    reviews
}

/// A well-formed model answer for each pipeline.
pub fn fixture_payload(kind: PipelineKind) -> Value {
    match kind {
        PipelineKind::Sentiment => json!({
            "overall_sentiment": "positive",
            "sentiment_breakdown": {"positive": 55, "neutral": 5, "negative": 40},
            "emotions": [
                {"emotion": "satisfaction", "frequency": 0.55},
                {"emotion": "frustration", "frequency": 0.4}
            ]
        }),
        PipelineKind::Issues => json!({"issues": [
            {"issue": "Crash on login", "frequency": 40, "severity": "high", "category": "bug"},
            {"issue": "Slow startup", "frequency": 6, "severity": "medium", "category": "performance"}
        ]}),
        PipelineKind::Features => json!({"features": [
            {"feature": "Dark mode", "count": 12, "category": "ui"},
            {"feature": "Offline sync", "count": 5, "category": "platform"}
        ]}),
        PipelineKind::Monetization => json!({
            "overall_risk": "medium",
            "risks": [
                {"risk": "Subscription price", "confidence": "medium", "category": "pricing", "impact": "Churn at renewal"}
            ]
        }),
        PipelineKind::Actions => json!({"actions": [
            {"action": "Fix the login crash", "priority": "critical", "expected_impact": "Recover 1-star reviewers", "effort": "medium"},
            {"action": "Ship dark mode", "priority": "medium", "expected_impact": "Answer top request", "effort": "low"}
        ]}),
    }
}

/// Scripted behavior of one pipeline's model calls.
#[derive(Debug, Clone)]
pub enum Behavior {
    Respond { payload: Value, cost: u64 },
    Fail(ModelError),
    /// Fail `failures` times, then respond.
    FlakyThen {
        failures: usize,
        error: ModelError,
        payload: Value,
        cost: u64,
    },
    Slow {
        delay: Duration,
        payload: Value,
        cost: u64,
    },
}

/// Model backend answering from a per-kind script.
///
/// Kinds without a script get [`fixture_payload`] at a cost of 100 tokens.
pub struct ScriptedBackend {
    model: String,
    scripts: HashMap<PipelineKind, Behavior>,
    calls: Mutex<HashMap<PipelineKind, usize>>,
}

pub const FIXTURE_COST: u64 = 100;

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            model: "scripted-model".to_string(),
            scripts: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with(mut self, kind: PipelineKind, behavior: Behavior) -> Self {
        self.scripts.insert(kind, behavior);
        self
    }

    pub fn calls(&self, kind: PipelineKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn record(&self, kind: PipelineKind) -> usize {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(kind).or_insert(0);
        *count += 1;
        *count
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let attempt = self.record(request.kind);
        let respond = |payload: &Value, cost: u64| ModelResponse {
            payload: payload.clone(),
            token_cost: cost,
        };

        match self.scripts.get(&request.kind) {
            None => Ok(respond(&fixture_payload(request.kind), FIXTURE_COST)),
            Some(Behavior::Respond { payload, cost }) => Ok(respond(payload, *cost)),
            Some(Behavior::Fail(err)) => Err(err.clone()),
            Some(Behavior::FlakyThen {
                failures,
                error,
                payload,
                cost,
            }) => {
                if attempt <= *failures {
                    Err(error.clone())
                } else {
                    Ok(respond(payload, *cost))
                }
            }
            Some(Behavior::Slow {
                delay,
                payload,
                cost,
            }) => {
                tokio::time::sleep(*delay).await;
                Ok(respond(payload, *cost))
            }
        }
    }
}

/// Fetcher returning a fixed review list, or a fixed error.
pub struct StaticFetcher {
    outcome: Result<Vec<Review>, FetchError>,
}

impl StaticFetcher {
    pub fn new(reviews: Vec<Review>) -> Self {
        Self {
            outcome: Ok(reviews),
        }
    }

    pub fn failing(error: FetchError) -> Self {
        Self {
            outcome: Err(error),
        }
    }
}

#[async_trait]
impl ReviewFetcher for StaticFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<ReviewCorpus, FetchError> {
        let mut reviews = self.outcome.clone()?;
        reviews.truncate(request.limit as usize);
        Ok(ReviewCorpus::new(
            request.app_id.clone(),
            request.platform,
            request.locale.clone(),
            reviews,
        ))
    }
}
