//! Monetization pipeline: pricing, ads and subscription complaints.

use super::{category_or_default, decode, format_reviews, require_name, NameMerger, PipelineContext};
use crate::error::FailureReason;
use crate::models::{Level, MonetizationFindings, PipelineKind, ReviewCorpus, RiskItem};
use serde::Deserialize;
use serde_json::{json, Value};

const KIND: PipelineKind = PipelineKind::Monetization;
const MAX_RISKS: usize = 10;

#[derive(Debug, Deserialize)]
struct RawFindings {
    overall_risk: Level,
    risks: Vec<RawRisk>,
}

#[derive(Debug, Deserialize)]
struct RawRisk {
    risk: String,
    confidence: Level,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    impact: Option<String>,
}

#[derive(Debug)]
struct BatchFindings {
    overall_risk: Level,
    risks: Vec<RiskItem>,
}

pub async fn analyze(
    ctx: &PipelineContext,
    corpus: &ReviewCorpus,
) -> Result<MonetizationFindings, FailureReason> {
    let mut batches = Vec::new();
    for chunk in corpus.reviews().chunks(ctx.batch_size()) {
        let prompt = format!(
            "Assess revenue risks in these {} app reviews:\n\n{}",
            chunk.len(),
            format_reviews(chunk)
        );
        let value = ctx.invoke(KIND, SYSTEM_PROMPT, prompt, schema()).await?;
        batches.push(validate(value)?);
    }
    Ok(merge(batches))
}

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "overall_risk": {"type": "string", "enum": ["low", "medium", "high"]},
            "risks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "risk": {"type": "string"},
                        "confidence": {"type": "string", "enum": ["low", "medium", "high"]},
                        "category": {"type": "string"},
                        "impact": {"type": "string"}
                    },
                    "required": ["risk", "confidence"]
                }
            }
        },
        "required": ["overall_risk", "risks"]
    })
}

fn validate(value: Value) -> Result<BatchFindings, FailureReason> {
    let raw: RawFindings = decode(KIND, value)?;
    let risks = raw
        .risks
        .into_iter()
        .map(|item| {
            Ok(RiskItem {
                risk: require_name(KIND, "risk", &item.risk)?,
                confidence: item.confidence,
                category: category_or_default(item.category),
                impact: item.impact.unwrap_or_default().trim().to_string(),
            })
        })
        .collect::<Result<Vec<_>, FailureReason>>()?;

    Ok(BatchFindings {
        overall_risk: raw.overall_risk,
        risks,
    })
}

/// Mean of the batch levels, bucketed back to a level.
fn mean_level(levels: &[Level]) -> Level {
    if levels.is_empty() {
        return Level::Low;
    }
    let mean = levels.iter().map(|l| l.weight() as f64).sum::<f64>() / levels.len() as f64;
    if mean >= 2.5 {
        Level::High
    } else if mean >= 1.5 {
        Level::Medium
    } else {
        Level::Low
    }
}

fn merge(batches: Vec<BatchFindings>) -> MonetizationFindings {
    let levels: Vec<Level> = batches.iter().map(|b| b.overall_risk).collect();

    let mut merger = NameMerger::new();
    for item in batches.into_iter().flat_map(|b| b.risks) {
        let name = item.risk.clone();
        merger.merge(&name, item, |acc, next| {
            if next.confidence > acc.confidence {
                acc.confidence = next.confidence;
            }
            if acc.impact.is_empty() {
                acc.impact = next.impact;
            }
        });
    }

    MonetizationFindings {
        overall_risk: mean_level(&levels),
        risks: merger.ranked_by(|r| r.confidence, MAX_RISKS),
    }
}

const SYSTEM_PROMPT: &str = r#"You are an expert in mobile app monetization.
Find complaints that threaten revenue: pricing, subscriptions, paywalls, ads, refunds and billing.

Return ONLY a JSON object with:
- overall_risk: "low", "medium" or "high"
- risks: items with risk (short name), confidence ("low", "medium" or "high"), category (e.g. "pricing", "ads", "subscription", "billing") and impact (one sentence)

If no monetization concerns appear, return {"overall_risk": "low", "risks": []}."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_level_thresholds() {
        assert_eq!(mean_level(&[Level::High, Level::Medium]), Level::High);
        assert_eq!(mean_level(&[Level::Medium, Level::Low]), Level::Medium);
        assert_eq!(mean_level(&[Level::Low, Level::Low, Level::Medium]), Level::Low);
        assert_eq!(mean_level(&[]), Level::Low);
    }

    #[test]
    fn test_merge_keeps_highest_confidence() {
        let a = validate(json!({
            "overall_risk": "medium",
            "risks": [
                {"risk": "Subscription too expensive", "confidence": "medium", "category": "pricing"},
                {"risk": "Too many ads", "confidence": "low", "category": "ads", "impact": "Users uninstall"}
            ]
        }))
        .unwrap();
        let b = validate(json!({
            "overall_risk": "high",
            "risks": [
                {"risk": "subscription too expensive", "confidence": "high", "impact": "Churn at renewal"}
            ]
        }))
        .unwrap();

        let merged = merge(vec![a, b]);
        assert_eq!(merged.overall_risk, Level::High);
        assert_eq!(merged.risks.len(), 2);
        assert_eq!(merged.risks[0].risk, "Subscription too expensive");
        assert_eq!(merged.risks[0].confidence, Level::High);
        assert_eq!(merged.risks[0].impact, "Churn at renewal");
        assert_eq!(merged.risks[1].impact, "Users uninstall");
    }

    #[test]
    fn test_rejects_unknown_confidence() {
        let err = validate(json!({
            "overall_risk": "low",
            "risks": [{"risk": "ads", "confidence": "certain"}]
        }))
        .unwrap_err();
        assert!(matches!(err, FailureReason::SchemaError { .. }));
    }

    #[test]
    fn test_rejects_missing_overall_risk() {
        let err = validate(json!({"risks": []})).unwrap_err();
        assert!(matches!(err, FailureReason::SchemaError { .. }));
    }
}
