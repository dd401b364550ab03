//! Review acquisition.
//!
//! The engine only depends on the [`ReviewFetcher`] trait; how reviews are
//! obtained (store scraping, exports, fixtures) is up to the implementation.

pub mod fetcher;

pub use fetcher::JsonFileFetcher;

use crate::error::{EngineError, FetchError};
use crate::models::{Platform, ReviewCorpus};
use async_trait::async_trait;

/// What to fetch for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub app_url: String,
    pub app_id: String,
    pub platform: Platform,
    pub locale: String,
    pub limit: u32,
}

/// Source of review corpora.
#[async_trait]
pub trait ReviewFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<ReviewCorpus, FetchError>;
}

/// Store listing an app URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreApp {
    pub platform: Platform,
    pub app_id: String,
}

/// Parse an App Store or Google Play listing URL.
///
/// Accepted shapes:
/// - `https://apps.apple.com/<cc>/app/<slug>/id<digits>`
/// - `https://play.google.com/store/apps/details?id=<package>`
pub fn parse_app_url(url: &str) -> Result<StoreApp, EngineError> {
    let invalid = || EngineError::Validation(format!("unsupported app URL: {}", url));

    let rest = url
        .trim()
        .strip_prefix("https://")
        .or_else(|| url.trim().strip_prefix("http://"))
        .ok_or_else(invalid)?;

    let (host, path_and_query) = rest.split_once('/').unwrap_or((rest, ""));
    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));

    match host.to_ascii_lowercase().as_str() {
        "apps.apple.com" | "itunes.apple.com" => {
            let app_id = path
                .split('/')
                .filter_map(|segment| segment.strip_prefix("id"))
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .last()
                .ok_or_else(invalid)?;
            Ok(StoreApp {
                platform: Platform::Ios,
                app_id: app_id.to_string(),
            })
        }
        "play.google.com" => {
            if path.trim_end_matches('/') != "store/apps/details" {
                return Err(invalid());
            }
            let app_id = query
                .split('&')
                .filter_map(|pair| pair.strip_prefix("id="))
                .find(|id| {
                    !id.is_empty()
                        && id
                            .bytes()
                            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_')
                })
                .ok_or_else(invalid)?;
            Ok(StoreApp {
                platform: Platform::Android,
                app_id: app_id.to_string(),
            })
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_store_url() {
        let app = parse_app_url("https://apps.apple.com/us/app/instagram/id389801252").unwrap();
        assert_eq!(app.platform, Platform::Ios);
        assert_eq!(app.app_id, "389801252");

        let app = parse_app_url("https://apps.apple.com/gb/app/notes/id123?platform=iphone").unwrap();
        assert_eq!(app.app_id, "123");
    }

    #[test]
    fn test_parse_play_store_url() {
        let app = parse_app_url(
            "https://play.google.com/store/apps/details?id=com.instagram.android&hl=en",
        )
        .unwrap();
        assert_eq!(app.platform, Platform::Android);
        assert_eq!(app.app_id, "com.instagram.android");

        let app = parse_app_url("https://play.google.com/store/apps/details?hl=en&id=org.example_app").unwrap();
        assert_eq!(app.app_id, "org.example_app");
    }

    #[test]
    fn test_rejects_other_urls() {
        for url in [
            "",
            "not a url",
            "ftp://apps.apple.com/us/app/x/id1",
            "https://apps.apple.com/us/app/instagram",
            "https://apps.apple.com/us/app/x/idabc",
            "https://play.google.com/store/apps/details",
            "https://play.google.com/store/apps/details?id=",
            "https://play.google.com/store/search?q=x",
            "https://example.com/app/id123",
        ] {
            assert!(
                matches!(parse_app_url(url), Err(EngineError::Validation(_))),
                "accepted {:?}",
                url
            );
        }
    }
}
