//! Features pipeline: what users ask the app to add.

use super::{category_or_default, decode, format_reviews, require_name, NameMerger, PipelineContext};
use crate::error::FailureReason;
use crate::models::{FeatureItem, FeatureList, PipelineKind, ReviewCorpus};
use serde::Deserialize;
use serde_json::{json, Value};

const KIND: PipelineKind = PipelineKind::Features;
const MAX_FEATURES: usize = 15;

#[derive(Debug, Deserialize)]
struct RawFeatures {
    features: Vec<RawFeature>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    feature: String,
    count: u32,
    #[serde(default)]
    category: Option<String>,
}

pub async fn analyze(ctx: &PipelineContext, corpus: &ReviewCorpus) -> Result<FeatureList, FailureReason> {
    let mut batches = Vec::new();
    for chunk in corpus.reviews().chunks(ctx.batch_size()) {
        let prompt = format!(
            "List the features requested in these {} app reviews:\n\n{}",
            chunk.len(),
            format_reviews(chunk)
        );
        let value = ctx.invoke(KIND, SYSTEM_PROMPT, prompt, schema()).await?;
        batches.push(validate(value, chunk.len())?);
    }
    Ok(merge(batches))
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "features": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "feature": {"type": "string"},
                        "count": {"type": "integer", "minimum": 1},
                        "category": {"type": "string"}
                    },
                    "required": ["feature", "count"]
                }
            }
        },
        "required": ["features"]
    })
}

fn validate(value: Value, batch_len: usize) -> Result<Vec<FeatureItem>, FailureReason> {
    let raw: RawFeatures = decode(KIND, value)?;
    raw.features
        .into_iter()
        .map(|item| {
            if item.count == 0 {
                return Err(FailureReason::schema_for(
                    KIND,
                    format!("feature '{}' has zero count", item.feature),
                ));
            }
            if item.count as usize > batch_len {
                return Err(FailureReason::schema_for(
                    KIND,
                    format!(
                        "feature '{}' has count {} in a batch of {} reviews",
                        item.feature, item.count, batch_len
                    ),
                ));
            }
            Ok(FeatureItem {
                feature: require_name(KIND, "feature", &item.feature)?,
                count: item.count,
                category: category_or_default(item.category),
            })
        })
        .collect()
}

fn merge(batches: Vec<Vec<FeatureItem>>) -> FeatureList {
    let mut merger = NameMerger::new();
    for item in batches.into_iter().flatten() {
        let name = item.feature.clone();
        merger.merge(&name, item, |acc, next| acc.count = acc.count.saturating_add(next.count));
    }
    FeatureList {
        features: merger.ranked_by(|f| f.count, MAX_FEATURES),
    }
}

const SYSTEM_PROMPT: &str = r#"You are an expert app review analyst.
Find the features and improvements users ask for.

Return ONLY a JSON object {"features": [...]} where each item has:
- feature: short name of the requested feature
- count: how many of the given reviews ask for it (at least 1)
- category: e.g. "ui", "integration", "content", "platform", "social"

If nobody asks for anything, return {"features": []}."#;
