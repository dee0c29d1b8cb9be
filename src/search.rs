//! Web search client.
//!
//! The pipeline talks to search through the [`SearchClient`] trait; the
//! shipped implementation queries the DuckDuckGo instant-answer API
//! (no API key required). Transport failures never surface to the
//! orchestrator: they are logged and become an empty result list.

use crate::types::RawHit;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Trait seam for the search provider.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Search for `query`, returning up to `max_results` hits in provider
    /// order, each tagged with `query` as its originating sub-query.
    async fn search(&self, query: &str, max_results: usize) -> Vec<RawHit>;
}

/// DuckDuckGo instant-answer search.
pub struct InstantAnswerSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl InstantAnswerSearch {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: "https://api.duckduckgo.com".to_string(),
        }
    }

    /// Override the API endpoint (local test servers).
    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SearchClient for InstantAnswerSearch {
    async fn search(&self, query: &str, max_results: usize) -> Vec<RawHit> {
        let url = format!(
            "{}/?q={}&format=json&no_html=1&skip_disambig=1",
            self.endpoint,
            urlencoding::encode(query)
        );

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(query, error = %e, "Search request failed, returning no hits");
                return Vec::new();
            }
        };

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(query, error = %e, "Search response unparsable, returning no hits");
                return Vec::new();
            }
        };

        let hits = parse_instant_answers(&body, query, max_results);
        debug!(query, hits = hits.len(), "Search completed");
        hits
    }
}

/// Walk the instant-answer payload: the abstract (if any) first, then
/// related topics (flattening nested topic groups), then plain results.
fn parse_instant_answers(body: &Value, query: &str, max_results: usize) -> Vec<RawHit> {
    let mut hits = Vec::new();

    if let Some(abstract_text) = body.get("AbstractText").and_then(Value::as_str) {
        if !abstract_text.is_empty() {
            if let Some(url) = non_empty_str(body.get("AbstractURL")) {
                let title = non_empty_str(body.get("Heading"))
                    .or_else(|| non_empty_str(body.get("AbstractSource")))
                    .unwrap_or(abstract_text);
                hits.push(RawHit {
                    title: title.to_string(),
                    url: url.to_string(),
                    snippet: abstract_text.to_string(),
                    origin_subquery: query.to_string(),
                });
            }
        }
    }

    for key in ["RelatedTopics", "Results"] {
        if let Some(items) = body.get(key).and_then(Value::as_array) {
            collect_topics(items, query, max_results, &mut hits);
        }
    }

    hits.truncate(max_results);
    hits
}

/// Topic entries are either `{Text, FirstURL}` leaves or `{Name, Topics}`
/// groups nesting more leaves.
fn collect_topics(items: &[Value], query: &str, max_results: usize, hits: &mut Vec<RawHit>) {
    for item in items {
        if hits.len() >= max_results {
            return;
        }
        if let Some(nested) = item.get("Topics").and_then(Value::as_array) {
            collect_topics(nested, query, max_results, hits);
            continue;
        }
        let Some(text) = non_empty_str(item.get("Text")) else {
            continue;
        };
        let Some(url) = non_empty_str(item.get("FirstURL")) else {
            continue;
        };
        // Topic text reads "Title - description"; use the left side as
        // the title when the separator is present.
        let title = text.split_once(" - ").map_or(text, |(t, _)| t);
        hits.push(RawHit {
            title: title.to_string(),
            url: url.to_string(),
            snippet: text.to_string(),
            origin_subquery: query.to_string(),
        });
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
