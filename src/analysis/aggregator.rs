//! Merging pipeline outcomes into a report.
//!
//! Aggregation is a pure function of its inputs (plus the timestamp), so the
//! same outcomes always produce the same report.

use crate::error::FailureReason;
use crate::models::{
    PipelineCost, PipelineKind, PipelineOutcome, PipelinePayload, Platform, RatingStats, Report,
    ReviewCorpus, Section, SentimentAnalysis, SignalComparison,
};
use crate::runner::RunReport;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Issues shown in a report.
pub const REPORT_ISSUES: usize = 10;
/// Feature requests shown in a report.
pub const REPORT_FEATURES: usize = 10;
/// Monetization risks shown in a report.
pub const REPORT_RISKS: usize = 5;
/// Actions shown in a report.
pub const REPORT_ACTIONS: usize = 10;

/// Percentage points between negative sentiment and low-star share above
/// which the two signals are flagged as diverging.
pub const DIVERGENCE_THRESHOLD: u32 = 20;

/// Corpus facts the report needs, computed without any model call.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusSummary {
    pub app_id: String,
    pub platform: Platform,
    pub locale: String,
    pub reviews_analyzed: usize,
    pub ratings: RatingStats,
}

impl From<&ReviewCorpus> for CorpusSummary {
    fn from(corpus: &ReviewCorpus) -> Self {
        Self {
            app_id: corpus.app_id().to_string(),
            platform: corpus.platform(),
            locale: corpus.locale().to_string(),
            reviews_analyzed: corpus.len(),
            ratings: corpus.rating_stats(),
        }
    }
}

/// Build the report for a finished run, stamped now.
pub fn aggregate(corpus: &CorpusSummary, run: &RunReport) -> Report {
    aggregate_at(corpus, run, Utc::now())
}

/// Build the report for a finished run with an explicit timestamp.
pub fn aggregate_at(corpus: &CorpusSummary, run: &RunReport, generated_at: DateTime<Utc>) -> Report {
    let mut sentiment = Section::Unavailable {
        reason: not_run(PipelineKind::Sentiment),
    };
    let mut issues = Section::Unavailable {
        reason: not_run(PipelineKind::Issues),
    };
    let mut features = Section::Unavailable {
        reason: not_run(PipelineKind::Features),
    };
    let mut monetization = Section::Unavailable {
        reason: not_run(PipelineKind::Monetization),
    };
    let mut actions = Section::Unavailable {
        reason: not_run(PipelineKind::Actions),
    };

    let mut costs = BTreeMap::new();
    let mut degraded = Vec::new();

    for kind in PipelineKind::ALL {
        match run.results.get(&kind) {
            Some(Ok(result)) => {
                costs.insert(
                    kind,
                    PipelineCost {
                        token_cost: result.token_cost,
                        cache_hit: result.cache_hit,
                    },
                );
                match result.payload.clone() {
                    PipelinePayload::Sentiment(data) => sentiment = Section::Available { data },
                    PipelinePayload::Issues(mut list) => {
                        list.issues.truncate(REPORT_ISSUES);
                        issues = Section::Available { data: list.issues };
                    }
                    PipelinePayload::Features(mut list) => {
                        list.features.truncate(REPORT_FEATURES);
                        features = Section::Available {
                            data: list.features,
                        };
                    }
                    PipelinePayload::Monetization(mut findings) => {
                        findings.risks.truncate(REPORT_RISKS);
                        monetization = Section::Available { data: findings };
                    }
                    PipelinePayload::Actions(mut list) => {
                        list.actions.truncate(REPORT_ACTIONS);
                        actions = Section::Available { data: list.actions };
                    }
                }
            }
            Some(Err(reason)) => {
                degraded.push(kind);
                let reason = reason.clone();
                match kind {
                    PipelineKind::Sentiment => sentiment = Section::Unavailable { reason },
                    PipelineKind::Issues => issues = Section::Unavailable { reason },
                    PipelineKind::Features => features = Section::Unavailable { reason },
                    PipelineKind::Monetization => monetization = Section::Unavailable { reason },
                    PipelineKind::Actions => actions = Section::Unavailable { reason },
                }
            }
            None => degraded.push(kind),
        }
    }

    let sentiment_vs_ratings = sentiment
        .data()
        .map(|s| compare_signals(s, &corpus.ratings));

    let mut report = Report {
        app_id: corpus.app_id.clone(),
        platform: corpus.platform,
        locale: corpus.locale.clone(),
        reviews_analyzed: corpus.reviews_analyzed,
        ratings: corpus.ratings.clone(),
        summary: String::new(),
        sentiment,
        issues,
        features,
        monetization,
        actions,
        sentiment_vs_ratings,
        costs,
        total_token_cost: run.total_cost,
        degraded,
        generated_at,
    };
    report.summary = summarize(&report);
    report
}

fn not_run(kind: PipelineKind) -> FailureReason {
    FailureReason::upstream(format!("{} pipeline did not run", kind))
}

/// Both signals side by side. Neither is adjusted to match the other.
pub fn compare_signals(sentiment: &SentimentAnalysis, ratings: &RatingStats) -> SignalComparison {
    let negative = sentiment.breakdown.negative;
    let low = ratings.low_star_share;
    SignalComparison {
        negative_sentiment: negative,
        low_star_share: low,
        diverges: negative.abs_diff(low) > DIVERGENCE_THRESHOLD,
    }
}

/// One-paragraph plain text summary of a report.
pub fn summarize(report: &Report) -> String {
    let mut parts = vec![format!(
        "Analyzed {} reviews of {} app {} ({}). Average rating {:.2}, {}% of reviews are 1-2 stars.",
        report.reviews_analyzed,
        report.platform,
        report.app_id,
        report.locale,
        report.ratings.average,
        report.ratings.low_star_share
    )];

    if let Some(s) = report.sentiment.data() {
        parts.push(format!(
            "Overall sentiment is {} ({}% positive, {}% neutral, {}% negative).",
            s.overall, s.breakdown.positive, s.breakdown.neutral, s.breakdown.negative
        ));
    }
    if let Some(comparison) = &report.sentiment_vs_ratings {
        if comparison.diverges {
            parts.push(format!(
                "Negative sentiment ({}%) and low-star share ({}%) diverge.",
                comparison.negative_sentiment, comparison.low_star_share
            ));
        }
    }
    if let Some(top) = report.issues.data().and_then(|i| i.first()) {
        parts.push(format!(
            "Top issue: {} ({} mentions, {} severity).",
            top.issue,
            top.frequency,
            top.severity.to_string().to_lowercase()
        ));
    }
    if let Some(top) = report.features.data().and_then(|f| f.first()) {
        parts.push(format!("Most requested feature: {}.", top.feature));
    }
    if let Some(m) = report.monetization.data() {
        parts.push(format!(
            "Monetization risk is {}.",
            m.overall_risk.to_string().to_lowercase()
        ));
    }
    if let Some(top) = report.actions.data().and_then(|a| a.first()) {
        parts.push(format!(
            "Top recommendation: {}.",
            top.action.trim_end_matches('.')
        ));
    }
    if !report.degraded.is_empty() {
        let names: Vec<&str> = report.degraded.iter().map(|k| k.as_str()).collect();
        parts.push(format!("Unavailable sections: {}.", names.join(", ")));
    }

    parts.join(" ")
}

/// Plain text description of a run where every pipeline failed.
pub fn describe_failures(results: &BTreeMap<PipelineKind, PipelineOutcome>) -> String {
    let reasons: Vec<String> = results
        .iter()
        .filter_map(|(kind, outcome)| outcome.as_ref().err().map(|r| format!("{}: {}", kind, r)))
        .collect();
    format!("all analysis pipelines failed ({})", reasons.join("; "))
}
