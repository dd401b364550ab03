//! Sentiment pipeline: overall tone, percentage split and emotions.

use super::{decode, format_reviews, require_name, NameMerger, PipelineContext};
use crate::error::FailureReason;
use crate::models::{Emotion, PipelineKind, ReviewCorpus, SentimentAnalysis, SentimentBreakdown, Tone};
use serde::Deserialize;
use serde_json::{json, Value};

const KIND: PipelineKind = PipelineKind::Sentiment;

/// Emotions kept after merging.
const MAX_EMOTIONS: usize = 10;

/// Percentage points one side must lead by to set the overall tone.
const TONE_MARGIN: u32 = 10;

#[derive(Debug, Deserialize)]
struct RawSentiment {
    overall_sentiment: Tone,
    sentiment_breakdown: RawBreakdown,
    #[serde(default)]
    emotions: Vec<RawEmotion>,
}

#[derive(Debug, Deserialize)]
struct RawBreakdown {
    positive: f64,
    neutral: f64,
    negative: f64,
}

#[derive(Debug, Deserialize)]
struct RawEmotion {
    emotion: String,
    frequency: f64,
}

/// A validated batch result and the number of reviews it covers.
#[derive(Debug)]
struct BatchSentiment {
    weight: usize,
    overall: Tone,
    shares: [f64; 3],
    emotions: Vec<Emotion>,
}

pub async fn analyze(
    ctx: &PipelineContext,
    corpus: &ReviewCorpus,
) -> Result<SentimentAnalysis, FailureReason> {
    let mut batches = Vec::new();
    for chunk in corpus.reviews().chunks(ctx.batch_size()) {
        let prompt = format!(
            "Analyze the sentiment of these {} app reviews:\n\n{}",
            chunk.len(),
            format_reviews(chunk)
        );
        let value = ctx.invoke(KIND, SYSTEM_PROMPT, prompt, schema()).await?;
        batches.push(validate(value, chunk.len())?);
    }
    Ok(merge(batches))
}

/// JSON schema the model output must follow.
pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "overall_sentiment": {"type": "string", "enum": ["positive", "neutral", "negative"]},
            "sentiment_breakdown": {
                "type": "object",
                "properties": {
                    "positive": {"type": "number"},
                    "neutral": {"type": "number"},
                    "negative": {"type": "number"}
                },
                "required": ["positive", "neutral", "negative"]
            },
            "emotions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "emotion": {"type": "string"},
                        "frequency": {"type": "number"}
                    },
                    "required": ["emotion", "frequency"]
                }
            }
        },
        "required": ["overall_sentiment", "sentiment_breakdown", "emotions"]
    })
}

fn validate(value: Value, weight: usize) -> Result<BatchSentiment, FailureReason> {
    let raw: RawSentiment = decode(KIND, value)?;
    let b = &raw.sentiment_breakdown;
    let shares = [b.positive, b.neutral, b.negative];

    if shares.iter().any(|s| !s.is_finite() || !(0.0..=100.0).contains(s)) {
        return Err(FailureReason::schema_for(
            KIND,
            format!("percentages out of range: {:?}", shares),
        ));
    }
    if shares.iter().sum::<f64>() <= 0.0 {
        return Err(FailureReason::schema_for(KIND, "breakdown is all zero"));
    }

    let mut emotions = Vec::with_capacity(raw.emotions.len());
    for e in raw.emotions {
        if !e.frequency.is_finite() || !(0.0..=1.0).contains(&e.frequency) {
            return Err(FailureReason::schema_for(
                KIND,
                format!("emotion frequency out of range: {}", e.frequency),
            ));
        }
        emotions.push(Emotion {
            emotion: require_name(KIND, "emotion", &e.emotion)?,
            frequency: e.frequency,
        });
    }

    Ok(BatchSentiment {
        weight,
        overall: raw.overall_sentiment,
        shares,
        emotions,
    })
}

fn merge(batches: Vec<BatchSentiment>) -> SentimentAnalysis {
    if let [single] = batches.as_slice() {
        let [p, n, neg] = single.shares;
        return SentimentAnalysis {
            overall: single.overall,
            breakdown: SentimentBreakdown::normalized(p, n, neg),
            emotions: top_emotions(single.emotions.clone(), 1),
        };
    }

    let total_weight: usize = batches.iter().map(|b| b.weight).sum();
    let mut weighted = [0.0f64; 3];
    for batch in &batches {
        // Each batch's shares are scaled to 100 first so models that drift
        // off 100 do not skew the mix.
        let sum: f64 = batch.shares.iter().sum();
        for (acc, share) in weighted.iter_mut().zip(batch.shares) {
            *acc += share / sum * 100.0 * batch.weight as f64;
        }
    }
    let weighted = weighted.map(|v| v / total_weight.max(1) as f64);
    let breakdown = SentimentBreakdown::normalized(weighted[0], weighted[1], weighted[2]);

    let batch_count = batches.len();
    let emotions = batches.into_iter().flat_map(|b| b.emotions).collect();

    SentimentAnalysis {
        overall: tone_of(&breakdown),
        breakdown,
        emotions: top_emotions(emotions, batch_count),
    }
}

fn tone_of(breakdown: &SentimentBreakdown) -> Tone {
    if breakdown.positive > breakdown.negative + TONE_MARGIN {
        Tone::Positive
    } else if breakdown.negative > breakdown.positive + TONE_MARGIN {
        Tone::Negative
    } else {
        Tone::Neutral
    }
}

/// Average frequencies over `batch_count` batches and keep the most common.
fn top_emotions(emotions: Vec<Emotion>, batch_count: usize) -> Vec<Emotion> {
    let mut merger = NameMerger::new();
    for emotion in emotions {
        let name = emotion.emotion.clone();
        merger.merge(&name, emotion, |acc, e| acc.frequency += e.frequency);
    }

    let divisor = batch_count.max(1) as f64;
    let mut averaged: Vec<Emotion> = merger
        .into_items()
        .into_iter()
        .map(|mut e| {
            e.frequency = ((e.frequency / divisor).min(1.0) * 100.0).round() / 100.0;
            e
        })
        .collect();

    averaged.sort_by(|a, b| b.frequency.total_cmp(&a.frequency));
    averaged.truncate(MAX_EMOTIONS);
    averaged
}

const SYSTEM_PROMPT: &str = r#"You are an expert app review analyst.
Classify the emotional tone of the reviews you are given.

Return ONLY a JSON object with:
- overall_sentiment: "positive", "neutral" or "negative"
- sentiment_breakdown: percentages of positive, neutral and negative reviews (0-100, summing to 100)
- emotions: the emotions users express, each with a frequency between 0 and 1

Base every number on the reviews provided. Do not invent reviews."#;

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(value: Value, weight: usize) -> BatchSentiment {
        validate(value, weight).unwrap()
    }

    #[test]
    fn test_single_batch_keeps_model_tone() {
        let result = merge(vec![batch(
            json!({
                "overall_sentiment": "negative",
                "sentiment_breakdown": {"positive": 30.4, "neutral": 20.3, "negative": 49.3},
                "emotions": [{"emotion": "frustration", "frequency": 0.6}]
            }),
            40,
        )]);

        assert_eq!(result.overall, Tone::Negative);
        assert_eq!(result.breakdown.total(), 100);
        assert_eq!(result.breakdown.negative, 50);
        assert_eq!(result.emotions[0].emotion, "frustration");
    }

    #[test]
    fn test_batches_are_weighted_by_size() {
        let big = batch(
            json!({
                "overall_sentiment": "positive",
                "sentiment_breakdown": {"positive": 80, "neutral": 10, "negative": 10},
                "emotions": [{"emotion": "joy", "frequency": 0.8}]
            }),
            30,
        );
        let small = batch(
            json!({
                "overall_sentiment": "negative",
                "sentiment_breakdown": {"positive": 20, "neutral": 10, "negative": 70},
                "emotions": [{"emotion": "Joy", "frequency": 0.2}, {"emotion": "anger", "frequency": 0.5}]
            }),
            10,
        );

        let result = merge(vec![big, small]);
        assert_eq!(result.breakdown.positive, 65);
        assert_eq!(result.breakdown.neutral, 10);
        assert_eq!(result.breakdown.negative, 25);
        assert_eq!(result.overall, Tone::Positive);

        assert_eq!(result.emotions[0].emotion, "joy");
        assert_eq!(result.emotions[0].frequency, 0.5);
        assert_eq!(result.emotions[1].emotion, "anger");
        assert_eq!(result.emotions[1].frequency, 0.25);
    }

    #[test]
    fn test_close_split_is_neutral() {
        let a = batch(
            json!({
                "overall_sentiment": "positive",
                "sentiment_breakdown": {"positive": 45, "neutral": 15, "negative": 40},
                "emotions": []
            }),
            50,
        );
        let b = batch(
            json!({
                "overall_sentiment": "negative",
                "sentiment_breakdown": {"positive": 40, "neutral": 15, "negative": 45},
                "emotions": []
            }),
            50,
        );
        assert_eq!(merge(vec![a, b]).overall, Tone::Neutral);
    }

    #[test]
    fn test_emotions_capped() {
        let emotions: Vec<Value> = (0..15)
            .map(|i| json!({"emotion": format!("e{}", i), "frequency": 0.5}))
            .collect();
        let result = merge(vec![batch(
            json!({
                "overall_sentiment": "neutral",
                "sentiment_breakdown": {"positive": 33, "neutral": 34, "negative": 33},
                "emotions": emotions
            }),
            10,
        )]);
        assert_eq!(result.emotions.len(), MAX_EMOTIONS);
        assert_eq!(result.emotions[0].emotion, "e0");
    }

    #[test]
    fn test_rejects_out_of_range_percentage() {
        let err = validate(
            json!({
                "overall_sentiment": "positive",
                "sentiment_breakdown": {"positive": 140, "neutral": 0, "negative": 0},
                "emotions": []
            }),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, FailureReason::SchemaError { .. }));
    }

    #[test]
    fn test_rejects_unknown_tone() {
        let err = validate(
            json!({
                "overall_sentiment": "ecstatic",
                "sentiment_breakdown": {"positive": 100, "neutral": 0, "negative": 0},
                "emotions": []
            }),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, FailureReason::SchemaError { .. }));
    }

    #[test]
    fn test_rejects_missing_breakdown() {
        let err = validate(json!({"overall_sentiment": "positive"}), 10).unwrap_err();
        assert!(matches!(err, FailureReason::SchemaError { .. }));
    }
}
