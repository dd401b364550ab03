//! Data models for the review analyzer.
//!
//! This module contains the core data structures shared by the job engine,
//! the analysis pipelines and the report renderer.

use crate::error::FailureReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// App store the reviews come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
        }
    }
}

/// Lifecycle state of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    FetchingReviews,
    AnalyzingReviews,
    AggregatingResults,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The only state a job may enter next, besides `Failed`.
    pub fn successor(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Created => Some(JobStatus::FetchingReviews),
            JobStatus::FetchingReviews => Some(JobStatus::AnalyzingReviews),
            JobStatus::AnalyzingReviews => Some(JobStatus::AggregatingResults),
            JobStatus::AggregatingResults => Some(JobStatus::Completed),
            JobStatus::Completed | JobStatus::Failed => None,
        }
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Created => "CREATED",
            JobStatus::FetchingReviews => "FETCHING_REVIEWS",
            JobStatus::AnalyzingReviews => "ANALYZING_REVIEWS",
            JobStatus::AggregatingResults => "AGGREGATING_RESULTS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Three-step scale used for issue severity, risk confidence and overall risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    /// Numeric weight (1-3) used when averaging levels.
    pub fn weight(&self) -> u32 {
        match self {
            Level::Low => 1,
            Level::Medium => 2,
            Level::High => 3,
        }
    }

    /// Returns an emoji representation of the level.
    pub fn emoji(&self) -> &'static str {
        match self {
            Level::Low => "🟢",
            Level::Medium => "🟡",
            Level::High => "🔴",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "Low"),
            Level::Medium => write!(f, "Medium"),
            Level::High => write!(f, "High"),
        }
    }
}

/// Priority of a recommended action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "Low"),
            Priority::Medium => write!(f, "Medium"),
            Priority::High => write!(f, "High"),
            Priority::Critical => write!(f, "Critical"),
        }
    }
}

/// Overall emotional tone of a set of reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Neutral,
    Negative,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tone::Positive => write!(f, "positive"),
            Tone::Neutral => write!(f, "neutral"),
            Tone::Negative => write!(f, "negative"),
        }
    }
}

/// The closed set of analysis passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Sentiment,
    Issues,
    Features,
    Monetization,
    Actions,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 5] = [
        PipelineKind::Sentiment,
        PipelineKind::Issues,
        PipelineKind::Features,
        PipelineKind::Monetization,
        PipelineKind::Actions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Sentiment => "sentiment",
            PipelineKind::Issues => "issues",
            PipelineKind::Features => "features",
            PipelineKind::Monetization => "monetization",
            PipelineKind::Actions => "actions",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single app store review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Star rating, 1-5.
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub locale: String,
}

impl Review {
    /// Title and body joined for prompting.
    pub fn text(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => format!("{}. {}", title, self.body),
            _ => self.body.clone(),
        }
    }
}

/// Immutable snapshot of the reviews fetched for one job.
///
/// Re-fetching produces a new corpus with a new content hash.
#[derive(Debug, Clone)]
pub struct ReviewCorpus {
    app_id: String,
    platform: Platform,
    locale: String,
    reviews: Vec<Review>,
    content_hash: String,
}

impl ReviewCorpus {
    pub fn new(
        app_id: impl Into<String>,
        platform: Platform,
        locale: impl Into<String>,
        reviews: Vec<Review>,
    ) -> Self {
        let content_hash = hash_reviews(&reviews);
        Self {
            app_id: app_id.into(),
            platform,
            locale: locale.into(),
            reviews,
            content_hash,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn len(&self) -> usize {
        self.reviews.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }

    /// Hex SHA-256 over the ordered review contents.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn rating_stats(&self) -> RatingStats {
        RatingStats::from_reviews(&self.reviews)
    }
}

fn hash_reviews(reviews: &[Review]) -> String {
    let mut hasher = Sha256::new();
    for review in reviews {
        hasher.update([review.rating]);
        hasher.update(review.title.as_deref().unwrap_or("").as_bytes());
        hasher.update([0x1f]);
        hasher.update(review.body.as_bytes());
        hasher.update([0x1f]);
        if let Some(date) = review.date {
            hasher.update(date.to_rfc3339().as_bytes());
        }
        hasher.update([0x1f]);
        hasher.update(review.locale.as_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

/// Star rating statistics computed directly from the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingStats {
    /// Mean rating rounded to two decimals.
    pub average: f64,
    /// Review count per star, index 0 is one star.
    pub distribution: [u32; 5],
    /// Share of one and two star reviews, in percent.
    pub low_star_share: u32,
}

impl RatingStats {
    pub fn from_reviews(reviews: &[Review]) -> Self {
        let mut distribution = [0u32; 5];
        let mut sum = 0u64;
        for review in reviews {
            let star = review.rating.clamp(1, 5);
            distribution[(star - 1) as usize] += 1;
            sum += star as u64;
        }

        let total = reviews.len() as u64;
        if total == 0 {
            return Self {
                average: 0.0,
                distribution,
                low_star_share: 0,
            };
        }

        let average = (sum as f64 / total as f64 * 100.0).round() / 100.0;
        let low = (distribution[0] + distribution[1]) as u64;
        let low_star_share = ((low * 100 + total / 2) / total) as u32;

        Self {
            average,
            distribution,
            low_star_share,
        }
    }

    #[cfg(test)]
    pub fn total(&self) -> u32 {
        self.distribution.iter().sum()
    }
}

/// Positive/neutral/negative split in whole percent, always summing to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentBreakdown {
    pub positive: u32,
    pub neutral: u32,
    pub negative: u32,
}

impl SentimentBreakdown {
    /// Normalize raw shares to integers summing to exactly 100.
    ///
    /// The rounding remainder goes to the largest bucket; ties pick positive,
    /// then neutral, then negative. All-zero input yields an even split.
    pub fn normalized(positive: f64, neutral: f64, negative: f64) -> Self {
        let raw = [positive.max(0.0), neutral.max(0.0), negative.max(0.0)];
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return Self {
                positive: 33,
                neutral: 34,
                negative: 33,
            };
        }

        let mut buckets = raw.map(|v| (v / total * 100.0).round() as i64);
        let drift = 100 - buckets.iter().sum::<i64>();
        let mut largest = 0;
        for i in 1..3 {
            if raw[i] > raw[largest] {
                largest = i;
            }
        }
        buckets[largest] += drift;

        Self {
            positive: buckets[0].max(0) as u32,
            neutral: buckets[1].max(0) as u32,
            negative: buckets[2].max(0) as u32,
        }
    }

    #[cfg(test)]
    pub fn total(&self) -> u32 {
        self.positive + self.neutral + self.negative
    }
}

/// An emotion detected across reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emotion {
    pub emotion: String,
    /// How common the emotion is, 0.0-1.0.
    pub frequency: f64,
}

/// Output of the sentiment pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub overall: Tone,
    pub breakdown: SentimentBreakdown,
    #[serde(default)]
    pub emotions: Vec<Emotion>,
}

/// A recurring problem reported by users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueItem {
    pub issue: String,
    pub frequency: u32,
    pub severity: Level,
    pub category: String,
}

/// Output of the issues pipeline, ranked by frequency.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssueList {
    pub issues: Vec<IssueItem>,
}

/// A feature users asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureItem {
    pub feature: String,
    pub count: u32,
    pub category: String,
}

/// Output of the features pipeline, ranked by request count.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureList {
    pub features: Vec<FeatureItem>,
}

/// A revenue-related complaint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub risk: String,
    pub confidence: Level,
    pub category: String,
    #[serde(default)]
    pub impact: String,
}

/// Output of the monetization pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetizationFindings {
    pub overall_risk: Level,
    pub risks: Vec<RiskItem>,
}

/// A recommended product action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub action: String,
    pub priority: Priority,
    #[serde(default)]
    pub expected_impact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<Level>,
}

/// Output of the actions pipeline, ranked by priority.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionList {
    pub actions: Vec<ActionItem>,
}

/// Typed pipeline output, one variant per pipeline kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelinePayload {
    Sentiment(SentimentAnalysis),
    Issues(IssueList),
    Features(FeatureList),
    Monetization(MonetizationFindings),
    Actions(ActionList),
}

impl PipelinePayload {
    pub fn kind(&self) -> PipelineKind {
        match self {
            PipelinePayload::Sentiment(_) => PipelineKind::Sentiment,
            PipelinePayload::Issues(_) => PipelineKind::Issues,
            PipelinePayload::Features(_) => PipelineKind::Features,
            PipelinePayload::Monetization(_) => PipelineKind::Monetization,
            PipelinePayload::Actions(_) => PipelineKind::Actions,
        }
    }
}

/// A successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub payload: PipelinePayload,
    /// Tokens spent producing this result in this run (zero on cache hit).
    pub token_cost: u64,
    pub cache_hit: bool,
}

/// Terminal state of one pipeline within a run.
pub type PipelineOutcome = Result<PipelineResult, FailureReason>;

/// A report section: populated, or explicitly marked as not produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section<T> {
    Available { data: T },
    Unavailable { reason: FailureReason },
}

impl<T> Section<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            Section::Available { data } => Some(data),
            Section::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Section::Available { .. })
    }
}

/// Negative sentiment next to the low-star share, reported as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalComparison {
    pub negative_sentiment: u32,
    pub low_star_share: u32,
    /// The two signals differ by more than the divergence threshold.
    pub diverges: bool,
}

/// Cost accounting for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCost {
    pub token_cost: u64,
    pub cache_hit: bool,
}

/// The merged analysis of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub app_id: String,
    pub platform: Platform,
    pub locale: String,
    pub reviews_analyzed: usize,
    pub ratings: RatingStats,
    pub summary: String,
    pub sentiment: Section<SentimentAnalysis>,
    pub issues: Section<Vec<IssueItem>>,
    pub features: Section<Vec<FeatureItem>>,
    pub monetization: Section<MonetizationFindings>,
    pub actions: Section<Vec<ActionItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_vs_ratings: Option<SignalComparison>,
    pub costs: BTreeMap<PipelineKind, PipelineCost>,
    pub total_token_cost: u64,
    pub degraded: Vec<PipelineKind>,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied options for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub locale: String,
    pub review_limit: u32,
    /// Must agree with the store the URL points at, when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Overrides the configured per-job token budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            review_limit: 500,
            platform: None,
            token_budget: None,
        }
    }
}

/// An analysis job record, owned by the job manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// 0-100, never decreases while the job is running.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub app_url: String,
    pub app_id: String,
    pub platform: Platform,
    pub options: AnalysisOptions,
    pub request_hash: String,
    pub result: Option<Report>,
    pub error: Option<String>,
    pub tokens_used: u64,
}

/// Read-only status view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(rating: u8, body: &str) -> Review {
        Review {
            rating,
            title: None,
            body: body.to_string(),
            date: None,
            locale: "en-US".to_string(),
        }
    }

    #[test]
    fn test_status_sequence() {
        assert!(JobStatus::Created.can_advance_to(JobStatus::FetchingReviews));
        assert!(JobStatus::FetchingReviews.can_advance_to(JobStatus::AnalyzingReviews));
        assert!(!JobStatus::Created.can_advance_to(JobStatus::AnalyzingReviews));
        assert!(!JobStatus::AnalyzingReviews.can_advance_to(JobStatus::FetchingReviews));
        assert!(JobStatus::AggregatingResults.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Failed));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::AggregatingResults).unwrap();
        assert_eq!(json, "\"AGGREGATING_RESULTS\"");
        assert_eq!(JobStatus::FetchingReviews.to_string(), "FETCHING_REVIEWS");
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Low < Level::Medium);
        assert!(Level::Medium < Level::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_rating_stats_mixed_corpus() {
        let mut reviews = Vec::new();
        reviews.extend((0..60).map(|_| review(5, "love it")));
        reviews.extend((0..40).map(|_| review(1, "crashes")));

        let stats = RatingStats::from_reviews(&reviews);
        assert_eq!(stats.average, 3.4);
        assert_eq!(stats.distribution, [40, 0, 0, 0, 60]);
        assert_eq!(stats.low_star_share, 40);
        assert_eq!(stats.total(), 100);
    }

    #[test]
    fn test_rating_stats_exact_average() {
        let mut reviews = Vec::new();
        reviews.extend((0..55).map(|_| review(5, "great")));
        reviews.extend((0..45).map(|_| review(1, "awful")));

        assert_eq!(RatingStats::from_reviews(&reviews).average, 3.2);
    }

    #[test]
    fn test_rating_stats_empty() {
        let stats = RatingStats::from_reviews(&[]);
        assert_eq!(stats.average, 0.0);
        assert_eq!(stats.low_star_share, 0);
    }

    #[test]
    fn test_breakdown_sums_to_hundred() {
        let cases = [
            (33.3, 33.3, 33.3),
            (60.0, 0.0, 40.0),
            (1.0, 1.0, 1.0),
            (12.5, 12.5, 75.0),
            (0.2, 0.3, 0.5),
            (70.4, 10.4, 19.2),
        ];
        for (p, n, neg) in cases {
            let breakdown = SentimentBreakdown::normalized(p, n, neg);
            assert_eq!(breakdown.total(), 100, "input {:?}", (p, n, neg));
        }
    }

    #[test]
    fn test_breakdown_remainder_goes_to_largest() {
        let breakdown = SentimentBreakdown::normalized(1.0, 1.0, 1.0);
        assert_eq!(breakdown.positive, 34);
        assert_eq!(breakdown.neutral, 33);
        assert_eq!(breakdown.negative, 33);

        let breakdown = SentimentBreakdown::normalized(0.0, 0.0, 0.0);
        assert_eq!(breakdown.total(), 100);
    }

    #[test]
    fn test_corpus_hash_changes_with_content() {
        let a = ReviewCorpus::new("1", Platform::Ios, "en-US", vec![review(5, "good")]);
        let b = ReviewCorpus::new("1", Platform::Ios, "en-US", vec![review(5, "good")]);
        let c = ReviewCorpus::new("1", Platform::Ios, "en-US", vec![review(4, "good")]);

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_section_serialization() {
        let available: Section<Vec<IssueItem>> = Section::Available { data: vec![] };
        let json = serde_json::to_string(&available).unwrap();
        assert!(json.contains("\"status\":\"available\""));

        let unavailable: Section<Vec<IssueItem>> = Section::Unavailable {
            reason: FailureReason::upstream("timeout"),
        };
        let json = serde_json::to_string(&unavailable).unwrap();
        assert!(json.contains("\"status\":\"unavailable\""));
        assert!(json.contains("upstream_error"));
    }

    #[test]
    fn test_payload_kind_round_trip() {
        let payload = PipelinePayload::Issues(IssueList::default());
        let json = serde_json::to_string(&payload).unwrap();
        let back: PipelinePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), PipelineKind::Issues);
    }
}
