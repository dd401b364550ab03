//! Review fetcher backed by an exported JSON file.

use super::{FetchRequest, ReviewFetcher};
use crate::error::FetchError;
use crate::models::{Review, ReviewCorpus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// Either a bare array of reviews or an object wrapping one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReviewFile {
    List(Vec<RawReview>),
    Wrapped { reviews: Vec<RawReview> },
}

#[derive(Debug, Deserialize)]
struct RawReview {
    rating: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "content", alias = "text")]
    body: String,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    locale: Option<String>,
}

/// Loads reviews from a JSON export on disk.
#[derive(Debug, Clone)]
pub struct JsonFileFetcher {
    path: PathBuf,
}

impl JsonFileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReviewFetcher for JsonFileFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<ReviewCorpus, FetchError> {
        info!("Loading reviews from {}", self.path.display());

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FetchError::Io(format!("{}: {}", self.path.display(), e)))?;

        let file: ReviewFile =
            serde_json::from_str(&content).map_err(|e| FetchError::Parse(e.to_string()))?;
        let raw = match file {
            ReviewFile::List(reviews) | ReviewFile::Wrapped { reviews } => reviews,
        };
        let total = raw.len();

        let mut reviews = Vec::new();
        for (i, item) in raw.into_iter().enumerate() {
            if !(1..=5).contains(&item.rating) {
                return Err(FetchError::Parse(format!(
                    "review {} has rating {} (expected 1-5)",
                    i, item.rating
                )));
            }

            let locale = item.locale.unwrap_or_else(|| request.locale.clone());
            if !locale.eq_ignore_ascii_case(&request.locale) {
                continue;
            }

            let body = normalize_whitespace(&item.body);
            let title = item
                .title
                .map(|t| normalize_whitespace(&t))
                .filter(|t| !t.is_empty());
            if body.is_empty() && title.is_none() {
                continue;
            }

            reviews.push(Review {
                rating: item.rating as u8,
                title,
                body,
                date: item.date,
                locale: request.locale.clone(),
            });
            if reviews.len() >= request.limit as usize {
                break;
            }
        }

        debug!(
            total,
            kept = reviews.len(),
            locale = %request.locale,
            "Filtered review export"
        );

        if reviews.is_empty() {
            return Err(FetchError::Empty {
                app_id: request.app_id.clone(),
                locale: request.locale.clone(),
            });
        }

        Ok(ReviewCorpus::new(
            request.app_id.clone(),
            request.platform,
            request.locale.clone(),
            reviews,
        ))
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
