// ============================================================================
// BACKGROUND SEARCH — thin HTTP client over a third-party image-search API
// ============================================================================
//
// Runs on a worker thread (the UI thread only ever sees the resulting
// `Vec<BackgroundResult>`).  Transport or API failures are absorbed into a
// fixed fallback set — the caller treats real results and fallbacks
// identically, and no error ever reaches the UI.

use serde::Deserialize;
use std::time::Duration;

use crate::{log_info, log_warn};

/// One search hit: a direct image URL plus a human-readable source label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackgroundResult {
    pub url: String,
    pub source_label: String,
}

/// Cap on returned results.
const SEARCH_LIMIT: usize = 100;
/// Environment variable holding the image-search API key.
const API_KEY_ENV: &str = "GACHASTAGE_SERP_API_KEY";
/// Image proxy that re-serves third-party images with permissive CORS-style
/// access and a bounded width, so picked backgrounds stay capturable.
const IMAGE_PROXY: &str = "https://wsrv.nl/";

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    images_results: Vec<SearchImage>,
}

#[derive(Deserialize)]
struct SearchImage {
    original: Option<String>,
    title: Option<String>,
}

/// The fixed fallback set returned when the network or the API fails.
pub fn fallback_backgrounds() -> Vec<BackgroundResult> {
    [
        (
            "https://images.unsplash.com/photo-1557683311-eac922347aa1?q=80&w=1000&auto=format&fit=crop",
            "Pink Aesthetic",
        ),
        (
            "https://images.unsplash.com/photo-1493246507139-91e8fad9978e?q=80&w=1000&auto=format&fit=crop",
            "Mountain View",
        ),
        (
            "https://images.unsplash.com/photo-1516055005891-b0de47285d30?q=80&w=1000&auto=format&fit=crop",
            "Minimalist",
        ),
        (
            "https://images.unsplash.com/photo-1534237710431-e2fc698436d0?q=80&w=1000&auto=format&fit=crop",
            "Building",
        ),
    ]
    .into_iter()
    .map(|(url, label)| BackgroundResult {
        url: url.to_string(),
        source_label: label.to_string(),
    })
    .collect()
}

/// Search for background images.  Empty query → empty list without any
/// network traffic; failures → the fallback set.  Blocking; call from a
/// worker thread.
pub fn search_backgrounds(query: &str) -> Vec<BackgroundResult> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }
    let Ok(api_key) = std::env::var(API_KEY_ENV) else {
        log_warn!("search: {} not set, using fallback set", API_KEY_ENV);
        return fallback_backgrounds();
    };

    match request_search(query, &api_key) {
        Ok(results) => {
            log_info!("search '{}': {} results", query, results.len());
            results
        }
        Err(e) => {
            log_warn!("search '{}' failed ({}), using fallback set", query, e);
            fallback_backgrounds()
        }
    }
}

fn request_search(query: &str, api_key: &str) -> Result<Vec<BackgroundResult>, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(12))
        .build()
        .map_err(|e| e.to_string())?;

    // Bias the query towards scene-friendly imagery.
    let q = format!("{} pinterest background aesthetic", query);
    let body = client
        .get("https://serpapi.com/search.json")
        .query(&[("engine", "google_images"), ("q", &q), ("api_key", api_key)])
        .send()
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?
        .text()
        .map_err(|e| e.to_string())?;

    Ok(parse_results(&body))
}

/// Parse the image-search JSON into results, wrapping each original URL
/// through the image proxy so the picked background stays capturable.
pub fn parse_results(json: &str) -> Vec<BackgroundResult> {
    let response: SearchResponse = match serde_json::from_str(json) {
        Ok(r) => r,
        Err(e) => {
            log_warn!("search: bad response payload: {}", e);
            return Vec::new();
        }
    };
    response
        .images_results
        .into_iter()
        .filter_map(|img| {
            let original = img.original?;
            let url = proxied_url(&original)?;
            Some(BackgroundResult {
                url,
                source_label: img.title.unwrap_or_else(|| "Search Result".to_string()),
            })
        })
        .take(SEARCH_LIMIT)
        .collect()
}

fn proxied_url(original: &str) -> Option<String> {
    let url = reqwest::Url::parse_with_params(
        IMAGE_PROXY,
        &[("url", original), ("w", "1000"), ("output", "jpg")],
    )
    .ok()?;
    Some(url.to_string())
}

/// Fetch and decode a picked background image.  Blocking; call from a
/// worker thread.  A failure here surfaces as the "protected image" state,
/// never as an error dialog.
pub fn fetch_background_image(url: &str) -> Result<image::RgbaImage, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| e.to_string())?;
    let bytes = client
        .get(url)
        .send()
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?
        .bytes()
        .map_err(|e| e.to_string())?;
    image::load_from_memory(&bytes)
        .map(|img| img.into_rgba8())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_returns_empty_without_network() {
        assert!(search_backgrounds("").is_empty());
        assert!(search_backgrounds("   ").is_empty());
    }

    #[test]
    fn fallback_set_is_small_and_fixed() {
        let set = fallback_backgrounds();
        assert_eq!(set.len(), 4);
        assert_eq!(set, fallback_backgrounds());
        assert!(set.iter().all(|r| r.url.starts_with("https://")));
    }

    #[test]
    fn parse_results_maps_and_proxies_urls() {
        let json = r#"{
            "images_results": [
                {"original": "https://example.com/a b.jpg", "title": "Park"},
                {"original": "https://example.com/2.png"},
                {"title": "no url, skipped"}
            ]
        }"#;
        let results = parse_results(json);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_label, "Park");
        assert_eq!(results[1].source_label, "Search Result");
        // Wrapped through the proxy with the original percent-encoded.
        assert!(results[0].url.starts_with("https://wsrv.nl/?url="));
        assert!(results[0].url.contains("a%20b.jpg") || results[0].url.contains("a+b.jpg"));
        assert!(results[0].url.contains("output=jpg"));
    }

    #[test]
    fn malformed_payload_parses_to_empty() {
        assert!(parse_results("not json").is_empty());
        assert!(parse_results("{}").is_empty());
    }
}
