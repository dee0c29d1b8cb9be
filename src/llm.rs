//! LLM client: plain-text and schema-constrained chat completions.
//!
//! The pipeline talks to the model through the [`LlmClient`] trait. The
//! shipped implementation targets OpenAI-compatible `/chat/completions`
//! endpoints and wraps every call in exponential-backoff retry for
//! transient failures (connect errors, timeouts, 429 with Retry-After,
//! 5xx). Terminal failures — other 4xx, empty choices, structured output
//! that does not parse — are never papered over with defaults.

use crate::error::LlmError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Trait seam for the language model provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form completion. `system` may be empty, in which case no
    /// system message is sent.
    async fn complete_text(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    /// Completion constrained to match `schema` (a JSON Schema object).
    /// Returns the parsed JSON value; schema mismatch is an error, not a
    /// coerced default.
    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
        schema: &Value,
        max_tokens: u32,
    ) -> Result<Value, LlmError>;
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Is this error worth retrying?
fn is_transient(err: &LlmError) -> bool {
    match err {
        LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. } => {
            true
        }
        LlmError::Api { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Backoff delay for the given attempt, respecting a server-provided
/// Retry-After when the error carries one.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let computed = base.min(config.max_backoff_ms as f64) as u64;
    if let LlmError::RateLimited { retry_after_secs } = err {
        return computed.max(retry_after_secs * 1_000).min(config.max_backoff_ms);
    }
    computed
}

/// Run `operation` with exponential-backoff retry on transient errors.
///
/// Once attempts are exhausted, the last transient error is reported as
/// [`LlmError::Unavailable`]; non-transient errors return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => return Err(e),
            Err(e) => {
                if attempt + 1 >= attempts {
                    return Err(LlmError::Unavailable {
                        message: e.to_string(),
                    });
                }
                let backoff_ms = compute_backoff(config, attempt, &e);
                warn!(
                    attempt = attempt + 1,
                    max = attempts,
                    backoff_ms,
                    error = %e,
                    "Retrying LLM call after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Parse a Retry-After header as whole or fractional seconds.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get("retry-after").and_then(|v| v.to_str().ok())?;
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    if let Ok(secs) = value.trim_end_matches('s').parse::<f64>() {
        return Some(secs.ceil() as u64);
    }
    None
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiChatClient {
    /// The client should already carry the call-level timeout.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            timeout_secs,
            retry,
        }
    }

    fn messages(system: &str, user: &str) -> Vec<Value> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": user}));
        messages
    }

    /// One request attempt, classified into the retry taxonomy.
    async fn request(&self, body: &Value) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = parse_retry_after(response.headers()).unwrap_or(1);
            return Err(LlmError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    timeout_secs: self.timeout_secs,
                }
            } else if e.is_decode() {
                LlmError::BadOutput {
                    message: format!("response body is not valid JSON: {e}"),
                }
            } else {
                LlmError::Connection {
                    message: e.to_string(),
                }
            }
        })
    }

    /// Full call with retry; terminal 4xx becomes `BadOutput`.
    async fn chat(&self, body: Value) -> Result<String, LlmError> {
        let result = with_retry(&self.retry, || self.request(&body)).await;
        let response = match result {
            Ok(response) => response,
            Err(LlmError::Api { status, message }) if (400..500).contains(&status) => {
                return Err(LlmError::BadOutput {
                    message: format!("provider rejected request with status {status}: {message}"),
                })
            }
            Err(e) => return Err(e),
        };

        let content = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| LlmError::BadOutput {
                message: "response carried no message content".to_string(),
            })?;

        debug!(chars = content.len(), model = %self.model, "LLM call completed");
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete_text(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "messages": Self::messages(system, user),
        });
        self.chat(body).await
    }

    async fn complete_structured(
        &self,
        system: &str,
        user: &str,
        schema: &Value,
        max_tokens: u32,
    ) -> Result<Value, LlmError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "messages": Self::messages(system, user),
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "strict": true,
                    "schema": schema,
                },
            },
        });
        let content = self.chat(body).await?;
        serde_json::from_str(&content).map_err(|e| LlmError::BadOutput {
            message: format!("structured output is not valid JSON: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&LlmError::RateLimited {
            retry_after_secs: 1
        }));
        assert!(is_transient(&LlmError::Timeout { timeout_secs: 30 }));
        assert!(is_transient(&LlmError::Connection {
            message: "reset".into()
        }));
        assert!(is_transient(&LlmError::Api {
            status: 503,
            message: String::new()
        }));
        assert!(!is_transient(&LlmError::Api {
            status: 404,
            message: String::new()
        }));
        assert!(!is_transient(&LlmError::BadOutput {
            message: "bad".into()
        }));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RetryConfig::default();
        let err = LlmError::Connection {
            message: String::new(),
        };
        assert_eq!(compute_backoff(&config, 0, &err), 1_000);
        assert_eq!(compute_backoff(&config, 1, &err), 2_000);
        assert_eq!(compute_backoff(&config, 2, &err), 4_000);
        assert_eq!(compute_backoff(&config, 10, &err), 10_000);
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let config = RetryConfig::default();
        let err = LlmError::RateLimited {
            retry_after_secs: 5,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 5_000);
        // But never beyond the cap.
        let err = LlmError::RateLimited {
            retry_after_secs: 600,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 10_000);
    }

    #[tokio::test]
    async fn test_with_retry_passes_through_success() {
        let config = RetryConfig::default();
        let result = with_retry(&config, || async { Ok::<_, LlmError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_with_retry_terminal_error_is_immediate() {
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&config, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::BadOutput {
                    message: "schema mismatch".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::BadOutput { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_into_unavailable() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_multiplier: 2.0,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&config, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Connection {
                    message: "refused".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Unavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_parse_retry_after_formats() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "30".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(30));

        headers.insert("retry-after", "0.5s".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(1));

        headers.insert("retry-after", "garbage".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_messages_omit_empty_system() {
        let messages = OpenAiChatClient::messages("", "hello");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");

        let messages = OpenAiChatClient::messages("be brief", "hello");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
    }
}
