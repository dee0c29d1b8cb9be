//! # webresearch
//!
//! A retrieval-augmented web search pipeline: expands a natural-language
//! query into sub-queries, searches the web concurrently, scores
//! candidates with a language model, fetches pages under politeness
//! constraints (robots.txt, per-origin spacing, concurrency caps, a
//! durable content cache), summarizes each page, and merges the
//! summaries into a single grounded answer.
//!
//! The [`Pipeline`] orchestrator is the entry point; the external
//! collaborators (search provider, LLM provider, HTTP fetching) sit
//! behind the [`SearchClient`], [`LlmClient`], and [`DocumentFetcher`]
//! traits so they can be substituted in tests or swapped for other
//! providers.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod filter;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod robots;
pub mod search;
pub mod types;
pub mod urlnorm;

// Re-export commonly used types at the crate root.
pub use cache::ContentCache;
pub use config::{load_config, PipelineConfig};
pub use error::{
    ConfigError, FetchError, LlmError, PipelineError, PipelinePhase, PromptError, Result,
    WebResearchError,
};
pub use fetch::{DocumentFetcher, HttpFetcher};
pub use filter::UrlFilter;
pub use llm::{LlmClient, OpenAiChatClient, RetryConfig};
pub use pipeline::{provenance_block, Pipeline};
pub use prompts::PromptStore;
pub use robots::RobotsChecker;
pub use search::{InstantAnswerSearch, SearchClient};
pub use types::{Candidate, ContentSource, FetchedDoc, FinalResult, RawHit, SummarizedDoc};
