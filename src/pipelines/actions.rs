//! Actions pipeline: prioritized recommendations for the product team.
//!
//! Runs on its own reduced view of the corpus (the lowest-rated reviews) in a
//! single call, so it does not wait on the other pipelines.

use super::{decode, format_reviews, require_name, NameMerger, PipelineContext};
use crate::error::FailureReason;
use crate::models::{ActionItem, ActionList, Level, PipelineKind, Priority, Review, ReviewCorpus};
use serde::Deserialize;
use serde_json::{json, Value};

const KIND: PipelineKind = PipelineKind::Actions;
const MAX_ACTIONS: usize = 10;

#[derive(Debug, Deserialize)]
struct RawActions {
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    action: String,
    priority: Priority,
    #[serde(default)]
    expected_impact: Option<String>,
    #[serde(default)]
    effort: Option<Level>,
}

pub async fn analyze(ctx: &PipelineContext, corpus: &ReviewCorpus) -> Result<ActionList, FailureReason> {
    let sample = lowest_rated(corpus.reviews(), ctx.batch_size() * 2);
    let prompt = format!(
        "Recommend actions based on these {} reviews (lowest ratings first) out of {} total:\n\n{}",
        sample.len(),
        corpus.len(),
        format_reviews(&sample)
    );
    let value = ctx.invoke(KIND, SYSTEM_PROMPT, prompt, schema()).await?;
    Ok(rank(validate(value)?))
}

/// Up to `limit` reviews, lowest ratings first, original order within a rating.
fn lowest_rated(reviews: &[Review], limit: usize) -> Vec<Review> {
    let mut sorted: Vec<&Review> = reviews.iter().collect();
    sorted.sort_by_key(|r| r.rating);
    sorted.into_iter().take(limit).cloned().collect()
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "actions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "action": {"type": "string"},
                        "priority": {"type": "string", "enum": ["low", "medium", "high", "critical"]},
                        "expected_impact": {"type": "string"},
                        "effort": {"type": "string", "enum": ["low", "medium", "high"]}
                    },
                    "required": ["action", "priority"]
                }
            }
        },
        "required": ["actions"]
    })
}

fn validate(value: Value) -> Result<Vec<ActionItem>, FailureReason> {
    let raw: RawActions = decode(KIND, value)?;
    raw.actions
        .into_iter()
        .map(|item| {
            Ok(ActionItem {
                action: require_name(KIND, "action", &item.action)?,
                priority: item.priority,
                expected_impact: item.expected_impact.unwrap_or_default().trim().to_string(),
                effort: item.effort,
            })
        })
        .collect()
}

fn rank(actions: Vec<ActionItem>) -> ActionList {
    let mut merger = NameMerger::new();
    for item in actions {
        let name = item.action.clone();
        merger.merge(&name, item, |acc, next| acc.priority = acc.priority.max(next.priority));
    }
    ActionList {
        actions: merger.ranked_by(|a| a.priority, MAX_ACTIONS),
    }
}

const SYSTEM_PROMPT: &str = r#"You are a product strategist reading app store reviews.
Recommend concrete actions the team should take, based only on what the reviews say.

Return ONLY a JSON object {"actions": [...]} where each item has:
- action: what to do, as one imperative sentence
- priority: "low", "medium", "high" or "critical"
- expected_impact: the user or business outcome, one sentence
- effort: "low", "medium" or "high"

Order does not matter. Return at most 10 actions."#;
