//! Issues pipeline: recurring problems ranked by how often users hit them.

use super::{category_or_default, decode, format_reviews, require_name, NameMerger, PipelineContext};
use crate::error::FailureReason;
use crate::models::{IssueItem, IssueList, Level, PipelineKind, ReviewCorpus};
use serde::Deserialize;
use serde_json::{json, Value};

const KIND: PipelineKind = PipelineKind::Issues;

/// Issues kept after merging.
const MAX_ISSUES: usize = 20;

#[derive(Debug, Deserialize)]
struct RawIssues {
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    issue: String,
    frequency: u32,
    severity: Level,
    #[serde(default)]
    category: Option<String>,
}

pub async fn analyze(ctx: &PipelineContext, corpus: &ReviewCorpus) -> Result<IssueList, FailureReason> {
    let mut batches = Vec::new();
    for chunk in corpus.reviews().chunks(ctx.batch_size()) {
        let prompt = format!(
            "Identify the problems reported in these {} app reviews:\n\n{}",
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
            "issues": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "issue": {"type": "string"},
                        "frequency": {"type": "integer", "minimum": 1},
                        "severity": {"type": "string", "enum": ["low", "medium", "high"]},
                        "category": {"type": "string"}
                    },
                    "required": ["issue", "frequency", "severity"]
                }
            }
        },
        "required": ["issues"]
    })
}

fn validate(value: Value, batch_len: usize) -> Result<Vec<IssueItem>, FailureReason> {
    let raw: RawIssues = decode(KIND, value)?;
    raw.issues
        .into_iter()
        .map(|item| {
            if item.frequency == 0 {
                return Err(FailureReason::schema_for(
                    KIND,
                    format!("issue '{}' has zero frequency", item.issue),
                ));
            }
            if item.frequency as usize > batch_len {
                return Err(FailureReason::schema_for(
                    KIND,
                    format!(
                        "issue '{}' has frequency {} in a batch of {} reviews",
                        item.issue, item.frequency, batch_len
                    ),
                ));
            }
            Ok(IssueItem {
                issue: require_name(KIND, "issue", &item.issue)?,
                frequency: item.frequency,
                severity: item.severity,
                category: category_or_default(item.category),
            })
        })
        .collect()
}

fn merge(batches: Vec<Vec<IssueItem>>) -> IssueList {
    let mut merger = NameMerger::new();
    for item in batches.into_iter().flatten() {
        let name = item.issue.clone();
        merger.merge(&name, item, |acc, next| {
            acc.frequency = acc.frequency.saturating_add(next.frequency);
            acc.severity = acc.severity.max(next.severity);
        });
    }

    IssueList {
        issues: merger.ranked_by(|i| i.frequency, MAX_ISSUES),
    }
}

const SYSTEM_PROMPT: &str = r#"You are an expert app review analyst.
Find the problems users report: bugs, crashes, performance, usability and service complaints.

Return ONLY a JSON object {"issues": [...]} where each item has:
- issue: short name of the problem
- frequency: how many of the given reviews mention it (at least 1)
- severity: "low", "medium" or "high"
- category: e.g. "bug", "performance", "ui", "account", "billing", "support"

If no problems are reported, return {"issues": []}."#;
