//! Configuration for the web search pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> TOML file ->
//! environment variables (prefixed `WEBRESEARCH_`, sections split with
//! `__`, e.g. `WEBRESEARCH_LLM__MODEL`). The resolved config is validated
//! once at pipeline construction.

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub filtering: FilterConfig,
    pub fetching: FetchConfig,
    pub cache: CacheConfig,
    /// Location of the YAML prompt template file.
    pub prompts_path: PathBuf,
    /// Log verbosity for the embedding application to apply; the library
    /// itself only emits `tracing` events.
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            filtering: FilterConfig::default(),
            fetching: FetchConfig::default(),
            cache: CacheConfig::default(),
            prompts_path: PathBuf::from("prompts/prompts.yaml"),
            log_level: "info".to_string(),
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key for the provider. Resolved from configuration or the
    /// `WEBRESEARCH_LLM__API_KEY` environment variable.
    pub api_key: String,
    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature, `0.0..=2.0`.
    pub temperature: f32,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum concurrent LLM calls during fan-out phases.
    pub max_concurrency: usize,
    /// Per-phase max-token caps.
    pub tokens: LlmTokenBudgets,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-nano".to_string(),
            temperature: 0.2,
            timeout_secs: 60,
            max_concurrency: 8,
            tokens: LlmTokenBudgets::default(),
        }
    }
}

/// Max-token caps for each LLM-backed phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTokenBudgets {
    pub expand_queries: u32,
    pub relevance: u32,
    pub summarize_content: u32,
    pub merge_summaries: u32,
}

impl Default for LlmTokenBudgets {
    fn default() -> Self {
        Self {
            expand_queries: 512,
            relevance: 100,
            summarize_content: 2_048,
            merge_summaries: 4_096,
        }
    }
}

/// Search fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Sub-queries produced by the expansion phase.
    pub num_better_queries: usize,
    /// Cap requested from the search provider per sub-query.
    pub max_results_per_query: usize,
    /// Cap on the candidate set after deduplication and filtering.
    pub total_max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_better_queries: 10,
            max_results_per_query: 5,
            total_max_results: 12,
        }
    }
}

/// Relevance threshold and domain blocklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Candidates scoring below this are dropped, `0..=5`.
    pub min_relevance_score: u8,
    /// Blocked domains; subdomains match too.
    pub disallowed_domains: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_relevance_score: 3,
            disallowed_domains: vec!["youtube.com".to_string(), "youtu.be".to_string()],
        }
    }
}

/// HTTP fetching politeness and extraction limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Global cap on concurrent HTTP fetches.
    pub max_concurrent_fetches: usize,
    /// Minimum seconds between request starts to the same origin.
    pub per_domain_delay: f64,
    /// Total HTTP timeout per fetch, in seconds.
    pub fetch_timeout: u64,
    /// Timeout for robots.txt fetches, in seconds.
    pub robots_timeout: u64,
    /// User-agent sent with fetches and robots.txt requests.
    pub user_agent: String,
    /// Extracted text is truncated to this many characters.
    pub max_content_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 20,
            per_domain_delay: 0.8,
            fetch_timeout: 30,
            robots_timeout: 10,
            user_agent: "webresearch/0.1".to_string(),
            max_content_chars: 8_000,
        }
    }
}

/// Content cache control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("content_cache"),
        }
    }
}

impl PipelineConfig {
    /// Validate the resolved configuration. Called once at pipeline
    /// construction; violations are fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(message: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                message: message.into(),
            }
        }

        if self.llm.api_key.is_empty() {
            return Err(invalid("llm.api_key must be set"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid(format!(
                "llm.temperature must be in [0, 2], got {}",
                self.llm.temperature
            )));
        }
        if self.llm.max_concurrency == 0 {
            return Err(invalid("llm.max_concurrency must be at least 1"));
        }
        if self.search.num_better_queries == 0 {
            return Err(invalid("search.num_better_queries must be at least 1"));
        }
        if self.search.max_results_per_query == 0 {
            return Err(invalid("search.max_results_per_query must be at least 1"));
        }
        if self.search.total_max_results == 0 {
            return Err(invalid("search.total_max_results must be at least 1"));
        }
        if self.filtering.min_relevance_score > 5 {
            return Err(invalid(format!(
                "filtering.min_relevance_score must be in [0, 5], got {}",
                self.filtering.min_relevance_score
            )));
        }
        if self.fetching.max_concurrent_fetches == 0 {
            return Err(invalid("fetching.max_concurrent_fetches must be at least 1"));
        }
        if !self.fetching.per_domain_delay.is_finite() || self.fetching.per_domain_delay < 0.0 {
            return Err(invalid("fetching.per_domain_delay must be non-negative"));
        }
        if self.fetching.fetch_timeout == 0 {
            return Err(invalid("fetching.fetch_timeout must be positive"));
        }
        if self.fetching.robots_timeout == 0 {
            return Err(invalid("fetching.robots_timeout must be positive"));
        }
        if self.fetching.max_content_chars == 0 {
            return Err(invalid("fetching.max_content_chars must be at least 1"));
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`WEBRESEARCH_` prefix, `__` section split)
/// 2. The given TOML file, if it exists
/// 3. Built-in defaults
pub fn load_config(config_file: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if let Some(path) = config_file {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }

    figment = figment.merge(Env::prefixed("WEBRESEARCH_").split("__"));

    figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.llm.api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.search.num_better_queries, 10);
        assert_eq!(config.search.total_max_results, 12);
        assert_eq!(config.filtering.min_relevance_score, 3);
        assert!(config
            .filtering
            .disallowed_domains
            .contains(&"youtube.com".to_string()));
        assert_eq!(config.fetching.max_concurrent_fetches, 20);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_validate_accepts_defaults_with_key() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_temperature_range() {
        let mut config = valid_config();
        config.llm.temperature = 2.5;
        assert!(config.validate().is_err());
        config.llm.temperature = -0.1;
        assert!(config.validate().is_err());
        config.llm.temperature = 2.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        let mut config = valid_config();
        config.search.num_better_queries = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.fetching.max_concurrent_fetches = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.fetching.max_content_chars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_relevance_bounds() {
        let mut config = valid_config();
        config.filtering.min_relevance_score = 6;
        assert!(config.validate().is_err());
        config.filtering.min_relevance_score = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_allows_zero_delay() {
        let mut config = valid_config();
        config.fetching.per_domain_delay = 0.0;
        assert!(config.validate().is_ok());
        config.fetching.per_domain_delay = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = valid_config();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: PipelineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(parsed.search.total_max_results, config.search.total_max_results);
        assert_eq!(
            parsed.filtering.disallowed_domains,
            config.filtering.disallowed_domains
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[llm]
api_key = "sk-from-file"
model = "gpt-4o-mini"

[search]
num_better_queries = 3

[fetching]
per_domain_delay = 0.0
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.llm.api_key, "sk-from-file");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.search.num_better_queries, 3);
        assert_eq!(config.fetching.per_domain_delay, 0.0);
        // Untouched sections keep their defaults.
        assert_eq!(config.search.max_results_per_query, 5);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.search.num_better_queries, 10);
    }
}
