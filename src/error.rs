//! Error types for the webresearch pipeline.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering LLM, fetching, prompt, configuration, and pipeline domains.

use std::path::PathBuf;

/// Top-level error type for the webresearch library.
#[derive(Debug, thiserror::Error)]
pub enum WebResearchError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias for the crate.
pub type Result<T> = std::result::Result<T, WebResearchError>;

/// Errors from LLM provider interactions.
///
/// `Unavailable` and `BadOutput` are the two terminal classes callers see
/// from the client: transient failures (connect, timeout, 429, 5xx) become
/// `Unavailable` once retries are exhausted; everything the provider will
/// never recover from (other 4xx, unparsable structured payloads) becomes
/// `BadOutput`. The finer-grained variants exist for retry classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("LLM provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("LLM produced unusable output: {message}")]
    BadOutput { message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("LLM request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("LLM connection failed: {message}")]
    Connection { message: String },

    #[error("LLM API returned status {status}: {message}")]
    Api { status: u16, message: String },
}

/// Per-URL errors from the HTTP fetcher.
///
/// `Clone` because in-flight fetches are shared between callers requesting
/// the same canonical URL.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("URL rejected by domain filter: {url}")]
    Filtered { url: String },

    #[error("URL disallowed by robots.txt: {url}")]
    RobotsDenied { url: String },

    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("Fetch timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("No text could be extracted from the response")]
    EmptyContent,

    #[error("Unsupported media type: {content_type}")]
    UnsupportedMedia { content_type: String },
}

/// Errors from the prompt store.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Prompt file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Prompt file parse error: {message}")]
    Parse { message: String },

    #[error("Prompt '{name}' is not defined")]
    Missing { name: String },

    #[error("Prompt '{name}' references placeholder '{placeholder}' with no binding")]
    PlaceholderMissing { name: String, placeholder: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration load error: {message}")]
    Load { message: String },
}

/// The pipeline phase in which a structural failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Expand,
    Search,
    Relevance,
    Fetch,
    Summarize,
    Merge,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Expand => write!(f, "expand"),
            PipelinePhase::Search => write!(f, "search"),
            PipelinePhase::Relevance => write!(f, "relevance"),
            PipelinePhase::Fetch => write!(f, "fetch"),
            PipelinePhase::Summarize => write!(f, "summarize"),
            PipelinePhase::Merge => write!(f, "merge"),
        }
    }
}

/// Errors from the pipeline orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline aborted in {phase} phase")]
    Aborted { phase: PipelinePhase },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Query must be a non-empty string")]
    EmptyQuery,

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(PipelinePhase::Expand.to_string(), "expand");
        assert_eq!(PipelinePhase::Merge.to_string(), "merge");
    }

    #[test]
    fn test_error_messages() {
        let err = FetchError::HttpStatus { status: 404 };
        assert_eq!(err.to_string(), "HTTP status 404");

        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert!(err.to_string().contains("30s"));

        let err = PipelineError::Aborted {
            phase: PipelinePhase::Expand,
        };
        assert!(err.to_string().contains("expand"));
    }

    #[test]
    fn test_top_level_conversions() {
        let err: WebResearchError = LlmError::BadOutput {
            message: "empty choices".into(),
        }
        .into();
        assert!(matches!(err, WebResearchError::Llm(_)));

        let err: WebResearchError = ConfigError::Invalid {
            message: "bad".into(),
        }
        .into();
        assert!(matches!(err, WebResearchError::Config(_)));
    }
}
