//! Data model for the web search pipeline.
//!
//! The serialized field names on [`SummarizedDoc`] and [`FinalResult`] are
//! stable output contract: `title`, `url`, `snippet`, `relevance`,
//! `summary`, `source` per document and `final_answer` at the top level.

use serde::{Deserialize, Serialize};
use url::Url;

/// A single hit as returned by the search provider, tagged with the
/// sub-query that produced it. Not unique across sub-queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHit {
    pub title: String,
    /// Absolute HTTP(S) URL as reported by the provider.
    pub url: String,
    pub snippet: String,
    /// The sub-query whose search produced this hit.
    pub origin_subquery: String,
}

/// Where a fetched document's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Network,
    Cache,
}

impl std::fmt::Display for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSource::Network => write!(f, "network"),
            ContentSource::Cache => write!(f, "cache"),
        }
    }
}

/// A deduplicated, URL-filtered search hit pending (or carrying) its
/// relevance score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub title: String,
    /// Canonicalized URL; the deduplication key.
    pub url: Url,
    pub snippet: String,
    /// Index of the first sub-query (in expansion order) that produced
    /// this candidate. Secondary sort key for the final ordering.
    pub subquery_index: usize,
    /// Every sub-query that produced a hit collapsing into this candidate.
    pub subqueries: Vec<String>,
    /// Relevance score in `0..=5`, assigned once by the relevance phase.
    pub relevance: u8,
}

/// A successfully fetched and text-extracted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedDoc {
    /// Canonical URL the document was fetched under.
    pub url: String,
    /// HTTP status of the response (200 for cache hits).
    pub status: u16,
    /// Extracted main text, truncated to the configured character cap.
    pub content_text: String,
    /// Byte length of `content_text`.
    pub byte_length: usize,
    pub source: ContentSource,
}

/// A fetched document together with its per-source summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizedDoc {
    pub title: String,
    /// Canonical URL.
    pub url: String,
    pub snippet: String,
    pub relevance: u8,
    pub summary: String,
    pub source: ContentSource,
    /// First-seen sub-query index, kept for ordering; not part of the
    /// serialized output.
    #[serde(skip)]
    pub subquery_index: usize,
}

/// The pipeline's output: ordered source documents plus the consolidated
/// answer derived from their summaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalResult {
    pub documents: Vec<SummarizedDoc>,
    pub final_answer: String,
}

impl FinalResult {
    /// An empty result with an empty answer, returned when no candidates
    /// survive the early phases.
    pub fn empty() -> Self {
        Self::default()
    }
}
