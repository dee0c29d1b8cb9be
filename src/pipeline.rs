//! The six-phase search pipeline orchestrator.
//!
//! Phases run in order — expand, search, relevance, fetch, summarize,
//! merge — with a barrier between each: a phase only starts once the
//! previous one has produced its full output set. Inside a phase, work
//! fans out concurrently, bounded by the LLM concurrency cap for model
//! calls and by the fetcher's own gates for HTTP. Per-item failures are
//! logged and drop the item; only a bad expansion aborts the run.

use crate::config::PipelineConfig;
use crate::error::{LlmError, PipelineError, PipelinePhase, PromptError, WebResearchError};
use crate::fetch::{build_fetch_client, build_robots_client, DocumentFetcher, HttpFetcher};
use crate::filter::UrlFilter;
use crate::llm::{LlmClient, OpenAiChatClient, RetryConfig};
use crate::prompts::PromptStore;
use crate::robots::RobotsChecker;
use crate::search::{InstantAnswerSearch, SearchClient};
use crate::types::{Candidate, FetchedDoc, FinalResult, SummarizedDoc};
use crate::cache::ContentCache;
use crate::urlnorm;
use futures::future::join_all;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Structured output of the expansion phase.
#[derive(Debug, Deserialize)]
struct ExpandedQueries {
    queries: Vec<String>,
}

/// Structured output of the relevance phase.
#[derive(Debug, Deserialize)]
struct RelevanceGrade {
    score: i64,
}

fn expand_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "queries": {
                "type": "array",
                "items": {"type": "string"},
                "minItems": 1
            }
        },
        "required": ["queries"],
        "additionalProperties": false
    })
}

fn relevance_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "score": {"type": "integer", "minimum": 0, "maximum": 5}
        },
        "required": ["score"],
        "additionalProperties": false
    })
}

/// Orchestrates a full retrieval-and-synthesis run.
pub struct Pipeline {
    config: PipelineConfig,
    prompts: PromptStore,
    filter: UrlFilter,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    fetcher: Arc<dyn DocumentFetcher>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline with real clients from validated configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, WebResearchError> {
        config.validate().map_err(WebResearchError::Config)?;
        let prompts = PromptStore::load(&config.prompts_path).map_err(WebResearchError::Prompt)?;

        let client_err = |e: reqwest::Error| {
            WebResearchError::Config(crate::error::ConfigError::Invalid {
                message: format!("failed to build HTTP client: {e}"),
            })
        };

        let llm_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout_secs))
            .build()
            .map_err(client_err)?;
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiChatClient::new(
            llm_http,
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.temperature,
            config.llm.timeout_secs,
            RetryConfig::default(),
        ));

        let search_http = reqwest::Client::builder()
            .user_agent(config.fetching.user_agent.clone())
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(client_err)?;
        let search: Arc<dyn SearchClient> = Arc::new(InstantAnswerSearch::new(search_http));

        let cache = Arc::new(ContentCache::new(
            config.cache.enabled,
            config.cache.directory.clone(),
        ));
        let robots = Arc::new(RobotsChecker::new(
            build_robots_client(&config.fetching).map_err(client_err)?,
        ));
        let filter = UrlFilter::new(&config.filtering.disallowed_domains);
        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(HttpFetcher::new(
            build_fetch_client(&config.fetching).map_err(client_err)?,
            filter.clone(),
            robots,
            cache,
            &config.fetching,
        ));

        Ok(Self::with_clients(config, prompts, llm, search, fetcher))
    }

    /// Build a pipeline around explicit collaborators. This is the seam
    /// integration tests use to substitute mock clients.
    pub fn with_clients(
        config: PipelineConfig,
        prompts: PromptStore,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        let filter = UrlFilter::new(&config.filtering.disallowed_domains);
        Self {
            config,
            prompts,
            filter,
            llm,
            search,
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the current run when triggered. In-flight work
    /// is dropped at the next phase race and partial results discarded.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace a triggered cancellation token so the pipeline can run
    /// again.
    pub fn reset_cancellation(&mut self) {
        self.cancel = CancellationToken::new();
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute the full pipeline for one query.
    pub async fn run(&self, query: &str) -> Result<FinalResult, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        info!(query, "Starting pipeline run");

        let sub_queries = self.guarded(self.expand(query)).await??;

        let candidates = self.guarded(self.search_candidates(&sub_queries)).await?;
        if candidates.is_empty() {
            info!("No candidates survived the search phase");
            return Ok(FinalResult::empty());
        }

        let scored = self.guarded(self.score_relevance(candidates, query)).await??;
        if scored.is_empty() {
            info!("No candidates met the relevance threshold");
            return Ok(FinalResult::empty());
        }

        let fetched = self.guarded(self.fetch_documents(scored)).await?;

        let mut documents = self.guarded(self.summarize_documents(fetched, query)).await??;
        sort_documents(&mut documents);
        if documents.is_empty() {
            info!("No documents survived fetching and summarization");
            return Ok(FinalResult::empty());
        }

        let final_answer = self.guarded(self.merge_summaries(&documents, query)).await??;

        info!(documents = documents.len(), "Pipeline run complete");
        Ok(FinalResult {
            documents,
            final_answer,
        })
    }

    /// Race a phase against cancellation. Dropping the phase future drops
    /// every in-flight child operation, releasing their permits.
    async fn guarded<T>(&self, phase: impl Future<Output = T>) -> Result<T, PipelineError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            value = phase => Ok(value),
        }
    }

    /// Phase 1: expand the query into sub-queries.
    ///
    /// An unavailable model degrades to the original query; output that
    /// violates the schema aborts the run.
    async fn expand(&self, query: &str) -> Result<Vec<String>, PipelineError> {
        let count = self.config.search.num_better_queries;
        let prompt = self.prompts.render(
            "expand_queries",
            &[("query", query), ("count", &count.to_string())],
        )?;

        let value = match self
            .llm
            .complete_structured(
                "",
                &prompt,
                &expand_schema(),
                self.config.llm.tokens.expand_queries,
            )
            .await
        {
            Ok(value) => value,
            Err(LlmError::BadOutput { message }) => {
                warn!(error = %message, "Query expansion produced unusable output");
                return Err(PipelineError::Aborted {
                    phase: PipelinePhase::Expand,
                });
            }
            Err(e) => {
                warn!(error = %e, "Query expansion unavailable, falling back to the original query");
                return Ok(vec![query.to_string()]);
            }
        };

        let parsed: ExpandedQueries = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Query expansion schema mismatch");
                return Err(PipelineError::Aborted {
                    phase: PipelinePhase::Expand,
                });
            }
        };

        let mut queries: Vec<String> = parsed
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return Err(PipelineError::Aborted {
                phase: PipelinePhase::Expand,
            });
        }
        queries.truncate(count);
        info!(count = queries.len(), "Expanded query into sub-queries");
        Ok(queries)
    }

    /// Phase 2: search every sub-query concurrently, then deduplicate by
    /// canonical URL (first seen wins, all origins recorded), filter, and
    /// cap the candidate set.
    async fn search_candidates(&self, sub_queries: &[String]) -> Vec<Candidate> {
        let per_query = self.config.search.max_results_per_query;
        let hits_per_query = join_all(
            sub_queries
                .iter()
                .map(|q| self.search.search(q, per_query)),
        )
        .await;

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut raw_total = 0usize;

        for (index, hits) in hits_per_query.into_iter().enumerate() {
            for hit in hits {
                raw_total += 1;
                let url = match urlnorm::canonicalize(&hit.url) {
                    Ok(url) => url,
                    Err(e) => {
                        debug!(url = %hit.url, error = %e, "Dropping unparsable search hit");
                        continue;
                    }
                };
                let key = url.as_str().to_string();

                if let Some(&i) = seen.get(&key) {
                    let existing = &mut candidates[i];
                    if !existing.subqueries.contains(&hit.origin_subquery) {
                        existing.subqueries.push(hit.origin_subquery);
                    }
                    continue;
                }
                if !self.filter.allows(&url) {
                    debug!(url = %key, "Dropping URL rejected by domain filter");
                    continue;
                }

                seen.insert(key, candidates.len());
                candidates.push(Candidate {
                    title: hit.title,
                    url,
                    snippet: hit.snippet,
                    subquery_index: index,
                    subqueries: vec![hit.origin_subquery],
                    relevance: 0,
                });
            }
        }

        info!(
            raw = raw_total,
            unique = candidates.len(),
            "Search phase collected candidates"
        );
        candidates.truncate(self.config.search.total_max_results);
        candidates
    }

    /// Phase 3: score every candidate 0..5 with bounded LLM fan-out and
    /// drop those below the threshold. A failed call scores 0 so one
    /// stuck candidate cannot block the run.
    async fn score_relevance(
        &self,
        candidates: Vec<Candidate>,
        query: &str,
    ) -> Result<Vec<Candidate>, PipelineError> {
        let cap = self.config.llm.max_concurrency.max(1);
        let total = candidates.len();

        let scored: Vec<Result<Candidate, PromptError>> = futures::stream::iter(
            candidates.into_iter().map(|mut candidate| async move {
                candidate.relevance = self.grade_candidate(&candidate, query).await?;
                Ok(candidate)
            }),
        )
        .buffer_unordered(cap)
        .collect()
        .await;

        let threshold = self.config.filtering.min_relevance_score;
        let mut kept = Vec::new();
        for result in scored {
            let candidate = result?;
            if candidate.relevance >= threshold {
                kept.push(candidate);
            } else {
                debug!(
                    url = %candidate.url,
                    relevance = candidate.relevance,
                    threshold,
                    "Dropping candidate below relevance threshold"
                );
            }
        }
        info!(
            kept = kept.len(),
            total, threshold, "Relevance phase filtered candidates"
        );
        Ok(kept)
    }

    async fn grade_candidate(
        &self,
        candidate: &Candidate,
        query: &str,
    ) -> Result<u8, PromptError> {
        let content = format!("{}\n{}", candidate.title, candidate.snippet);
        let prompt = self
            .prompts
            .render("relevance", &[("query", query), ("content", &content)])?;

        let value = match self
            .llm
            .complete_structured(
                "",
                &prompt,
                &relevance_schema(),
                self.config.llm.tokens.relevance,
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Relevance call failed, scoring 0");
                return Ok(0);
            }
        };

        match serde_json::from_value::<RelevanceGrade>(value) {
            Ok(grade) if (0..=5).contains(&grade.score) => Ok(grade.score as u8),
            Ok(grade) => {
                warn!(url = %candidate.url, score = grade.score, "Relevance score out of range, scoring 0");
                Ok(0)
            }
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Relevance schema mismatch, scoring 0");
                Ok(0)
            }
        }
    }

    /// Phase 4: fetch all remaining candidates concurrently. The fetcher
    /// enforces its own politeness gates; failures drop the document.
    async fn fetch_documents(
        &self,
        candidates: Vec<Candidate>,
    ) -> Vec<(Candidate, FetchedDoc)> {
        let results = join_all(candidates.into_iter().map(|candidate| async move {
            let result = self.fetcher.fetch(&candidate.url).await;
            (candidate, result)
        }))
        .await;

        let mut fetched = Vec::new();
        for (candidate, result) in results {
            match result {
                Ok(doc) if !doc.content_text.trim().is_empty() => fetched.push((candidate, doc)),
                Ok(_) => {
                    warn!(url = %candidate.url, "Dropping document with empty extracted text")
                }
                Err(e) => {
                    warn!(url = %candidate.url, error = %e, "Dropping document after fetch failure")
                }
            }
        }
        info!(fetched = fetched.len(), "Fetch phase complete");
        fetched
    }

    /// Phase 5: summarize each fetched document with bounded LLM fan-out.
    /// A failed or empty summary drops the document, not the run.
    async fn summarize_documents(
        &self,
        docs: Vec<(Candidate, FetchedDoc)>,
        query: &str,
    ) -> Result<Vec<SummarizedDoc>, PipelineError> {
        let cap = self.config.llm.max_concurrency.max(1);

        let results: Vec<Result<Option<SummarizedDoc>, PromptError>> =
            futures::stream::iter(docs.into_iter().map(|(candidate, doc)| async move {
                let prompt = self.prompts.render(
                    "summarize",
                    &[("query", query), ("content", &doc.content_text)],
                )?;
                match self
                    .llm
                    .complete_text("", &prompt, self.config.llm.tokens.summarize_content)
                    .await
                {
                    Ok(summary) if !summary.trim().is_empty() => Ok(Some(SummarizedDoc {
                        title: candidate.title,
                        url: doc.url,
                        snippet: candidate.snippet,
                        relevance: candidate.relevance,
                        summary,
                        source: doc.source,
                        subquery_index: candidate.subquery_index,
                    })),
                    Ok(_) => {
                        warn!(url = %doc.url, "Dropping document with empty summary");
                        Ok(None)
                    }
                    Err(e) => {
                        warn!(url = %doc.url, error = %e, "Dropping document after summarization failure");
                        Ok(None)
                    }
                }
            }))
            .buffer_unordered(cap)
            .collect()
            .await;

        let mut documents = Vec::new();
        for result in results {
            if let Some(doc) = result? {
                documents.push(doc);
            }
        }
        info!(summarized = documents.len(), "Summarize phase complete");
        Ok(documents)
    }

    /// Phase 6: merge the per-document summaries into one answer. A
    /// failed or empty merge falls back to the deterministic provenance
    /// concatenation so the answer is never empty while documents exist.
    async fn merge_summaries(
        &self,
        documents: &[SummarizedDoc],
        query: &str,
    ) -> Result<String, PipelineError> {
        let joined = provenance_block(documents);
        let prompt = self
            .prompts
            .render("merge", &[("query", query), ("summaries", &joined)])?;

        match self
            .llm
            .complete_text("", &prompt, self.config.llm.tokens.merge_summaries)
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => Ok(answer),
            Ok(_) => {
                warn!("Merge returned an empty answer, using concatenated summaries");
                Ok(joined)
            }
            Err(e) => {
                warn!(error = %e, "Merge failed, using concatenated summaries");
                Ok(joined)
            }
        }
    }
}

/// Order documents for output: relevance descending, then first-seen
/// sub-query index ascending, then canonical URL. The key is total, so
/// the order is deterministic.
pub(crate) fn sort_documents(documents: &mut [SummarizedDoc]) {
    documents.sort_by(|a, b| {
        b.relevance
            .cmp(&a.relevance)
            .then(a.subquery_index.cmp(&b.subquery_index))
            .then_with(|| a.url.cmp(&b.url))
    });
}

/// The provenance-marked concatenation of summaries handed to the merge
/// prompt, and the deterministic fallback answer when merging fails.
pub fn provenance_block(documents: &[SummarizedDoc]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "== Source {} ==\nURL: {}\nSummary: {}",
                i + 1,
                doc.url,
                doc.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentSource;

    fn doc(url: &str, relevance: u8, subquery_index: usize) -> SummarizedDoc {
        SummarizedDoc {
            title: "t".into(),
            url: url.into(),
            snippet: "s".into(),
            relevance,
            summary: format!("summary of {url}"),
            source: ContentSource::Network,
            subquery_index,
        }
    }

    #[test]
    fn test_sort_orders_by_relevance_then_subquery_then_url() {
        let mut docs = vec![
            doc("https://c.test/", 3, 0),
            doc("https://a.test/", 5, 1),
            doc("https://b.test/", 5, 0),
            doc("https://a.test/z", 5, 0),
        ];
        sort_documents(&mut docs);
        let urls: Vec<&str> = docs.iter().map(|d| d.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.test/z",
                "https://b.test/",
                "https://a.test/",
                "https://c.test/",
            ]
        );
    }

    #[test]
    fn test_provenance_block_format() {
        let docs = vec![doc("https://a.test/", 5, 0), doc("https://b.test/", 4, 0)];
        let block = provenance_block(&docs);
        assert!(block.starts_with("== Source 1 ==\nURL: https://a.test/\n"));
        assert!(block.contains("== Source 2 ==\nURL: https://b.test/\n"));
        assert!(block.contains("Summary: summary of https://a.test/"));
    }

    #[test]
    fn test_schemas_are_objects() {
        assert_eq!(expand_schema()["type"], "object");
        assert_eq!(relevance_schema()["properties"]["score"]["maximum"], 5);
    }
}
