//! Report rendering.
//!
//! Renders a [`Report`] as Markdown for people or pretty JSON for tools.
//! Unavailable sections are rendered with their failure reason, never
//! silently dropped.

use crate::error::FailureReason;
use crate::models::{
    ActionItem, FeatureItem, IssueItem, MonetizationFindings, PipelineKind, Report, Section,
    SentimentAnalysis,
};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# App Review Analysis\n\n");
    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_ratings_section(report));
    output.push_str(&render_section("Sentiment", &report.sentiment, |s| {
        generate_sentiment_body(s, report)
    }));
    output.push_str(&render_section("Top Issues", &report.issues, |items| {
        generate_issues_body(items)
    }));
    output.push_str(&render_section(
        "Feature Requests",
        &report.features,
        |items| generate_features_body(items),
    ));
    output.push_str(&render_section(
        "Monetization Risks",
        &report.monetization,
        generate_monetization_body,
    ));
    output.push_str(&render_section(
        "Recommended Actions",
        &report.actions,
        |items| generate_actions_body(items),
    ));
    output.push_str(&generate_costs_section(report));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **App ID:** `{}`\n", report.app_id));
    section.push_str(&format!("- **Platform:** {}\n", report.platform));
    section.push_str(&format!("- **Locale:** {}\n", report.locale));
    section.push_str(&format!(
        "- **Reviews Analyzed:** {}\n",
        report.reviews_analyzed
    ));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if report.is_degraded() {
        let names: Vec<&str> = report.degraded.iter().map(PipelineKind::as_str).collect();
        section.push_str(&format!(
            "- **Unavailable Sections:** {}\n",
            names.join(", ")
        ));
    }
    section.push('\n');

    section
}

fn generate_summary_section(report: &Report) -> String {
    format!("## Summary\n\n{}\n\n", report.summary)
}

fn generate_ratings_section(report: &Report) -> String {
    let ratings = &report.ratings;
    let mut section = String::new();

    section.push_str("## Ratings\n\n");
    section.push_str(&format!(
        "**Average:** {:.2} ★ | **1-2 star share:** {}%\n\n",
        ratings.average, ratings.low_star_share
    ));
    section.push_str("| ★1 | ★2 | ★3 | ★4 | ★5 |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    let counts: Vec<String> = ratings.distribution.iter().map(u32::to_string).collect();
    section.push_str(&format!("| {} |\n\n", counts.join(" | ")));

    section
}

/// Render a section heading plus either its body or an unavailable note.
fn render_section<T>(title: &str, section: &Section<T>, body: impl FnOnce(&T) -> String) -> String {
    let mut out = format!("## {}\n\n", title);
    match section {
        Section::Available { data } => out.push_str(&body(data)),
        Section::Unavailable { reason } => out.push_str(&unavailable_note(reason)),
    }
    out
}

fn unavailable_note(reason: &FailureReason) -> String {
    let label = match reason {
        FailureReason::BudgetExceeded { .. } => "token budget exhausted",
        FailureReason::UpstreamError { .. } => "model backend error",
        FailureReason::SchemaError { .. } => "invalid model output",
    };
    format!("> ⚠️ **Unavailable** ({}): {}\n\n", label, reason)
}

fn generate_sentiment_body(sentiment: &SentimentAnalysis, report: &Report) -> String {
    let b = &sentiment.breakdown;
    let mut body = String::new();

    body.push_str(&format!("**Overall tone:** {}\n\n", sentiment.overall));
    body.push_str("| 😀 Positive | 😐 Neutral | 😞 Negative |\n");
    body.push_str("|:---:|:---:|:---:|\n");
    body.push_str(&format!(
        "| {}% | {}% | {}% |\n\n",
        b.positive, b.neutral, b.negative
    ));

    if let Some(comparison) = &report.sentiment_vs_ratings {
        body.push_str(&format!(
            "Negative sentiment {}% vs. 1-2 star share {}%{}\n\n",
            comparison.negative_sentiment,
            comparison.low_star_share,
            if comparison.diverges {
                " (signals diverge)"
            } else {
                ""
            }
        ));
    }

    if !sentiment.emotions.is_empty() {
        body.push_str("| Emotion | Frequency |\n");
        body.push_str("|:---|:---:|\n");
        for emotion in &sentiment.emotions {
            body.push_str(&format!(
                "| {} | {:.0}% |\n",
                emotion.emotion,
                emotion.frequency * 100.0
            ));
        }
        body.push('\n');
    }

    body
}

fn generate_issues_body(issues: &[IssueItem]) -> String {
    if issues.is_empty() {
        return "No recurring issues were reported. 🎉\n\n".to_string();
    }

    let mut body = String::new();
    body.push_str("| # | Issue | Mentions | Severity | Category |\n");
    body.push_str("|:---:|:---|:---:|:---|:---|\n");
    for (i, issue) in issues.iter().enumerate() {
        body.push_str(&format!(
            "| {} | {} | {} | {} {} | {} |\n",
            i + 1,
            issue.issue,
            issue.frequency,
            issue.severity.emoji(),
            issue.severity,
            issue.category
        ));
    }
    body.push('\n');
    body
}

fn generate_features_body(features: &[FeatureItem]) -> String {
    if features.is_empty() {
        return "No feature requests found.\n\n".to_string();
    }

    let mut body = String::new();
    body.push_str("| # | Feature | Requests | Category |\n");
    body.push_str("|:---:|:---|:---:|:---|\n");
    for (i, feature) in features.iter().enumerate() {
        body.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            i + 1,
            feature.feature,
            feature.count,
            feature.category
        ));
    }
    body.push('\n');
    body
}

fn generate_monetization_body(findings: &MonetizationFindings) -> String {
    let mut body = format!(
        "**Overall risk:** {} {}\n\n",
        findings.overall_risk.emoji(),
        findings.overall_risk
    );

    for risk in &findings.risks {
        body.push_str(&format!(
            "- {} **{}** ({}, {} confidence)",
            risk.confidence.emoji(),
            risk.risk,
            risk.category,
            risk.confidence.to_string().to_lowercase()
        ));
        if !risk.impact.is_empty() {
            body.push_str(&format!(": {}", risk.impact));
        }
        body.push('\n');
    }
    body.push('\n');
    body
}

fn generate_actions_body(actions: &[ActionItem]) -> String {
    if actions.is_empty() {
        return "No actions recommended.\n\n".to_string();
    }

    let mut body = String::new();
    for (i, action) in actions.iter().enumerate() {
        body.push_str(&format!("{}. **[{}]** {}", i + 1, action.priority, action.action));
        if let Some(effort) = action.effort {
            body.push_str(&format!(" *(effort: {})*", effort.to_string().to_lowercase()));
        }
        body.push('\n');
        if !action.expected_impact.is_empty() {
            body.push_str(&format!("   > 💡 {}\n", action.expected_impact));
        }
    }
    body.push('\n');
    body
}

fn generate_costs_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Token Usage\n\n");
    section.push_str("| Pipeline | Tokens | Cached |\n");
    section.push_str("|:---|:---:|:---:|\n");
    for kind in PipelineKind::ALL {
        match report.costs.get(&kind) {
            Some(cost) => section.push_str(&format!(
                "| {} | {} | {} |\n",
                kind,
                cost.token_cost,
                if cost.cache_hit { "yes" } else { "no" }
            )),
            None => section.push_str(&format!("| {} | - | - |\n", kind)),
        }
    }
    section.push_str(&format!(
        "| **Total** | **{}** | |\n\n",
        report.total_token_cost
    ));

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by ReviewLens*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write the rendered report to `path`.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report: {}", path.display()))
}
