//! OpenAI-compatible HTTP embedding provider.
//!
//! Texts are sent in batches of `batch_size`; each batch is retried with the
//! injected [`RetryPolicy`] when the failure is transient (rate limits,
//! server errors, timeouts, connection failures).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use gridrag_core::config::EmbeddingSettings;
use gridrag_core::error::{Error, Result};
use gridrag_core::retry::RetryPolicy;
use gridrag_core::traits::EmbeddingProvider;

const PLACEHOLDER_KEY_PREFIX: &str = "sk-placeholder";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    model_id: String,
    dim: usize,
    batch_size: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dim", &self.dim)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    /// Build from settings, reading the API key from `settings.api_key_env`.
    pub fn from_settings(settings: &EmbeddingSettings, retry: RetryPolicy) -> Result<Self> {
        let key = std::env::var(&settings.api_key_env).unwrap_or_default();
        Self::with_api_key(settings, key, retry)
    }

    pub fn with_api_key(settings: &EmbeddingSettings, api_key: String, retry: RetryPolicy) -> Result<Self> {
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() || api_key.starts_with(PLACEHOLDER_KEY_PREFIX) {
            return Err(Error::MissingCredentials(format!(
                "embedding API key not configured (set {})",
                settings.api_key_env
            )));
        }
        if settings.dimensions == 0 || settings.batch_size == 0 {
            return Err(Error::InvalidConfig("embedding dimensions and batch_size must be positive".into()));
        }
        retry.validate()?;
        let timeout = Duration::from_millis(settings.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {e}")))?;
        info!(model = %settings.model, dim = settings.dimensions, endpoint = %settings.endpoint, "embedding provider ready");
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key,
            model: settings.model.clone(),
            model_id: format!("openai:{}:d{}", settings.model, settings.dimensions),
            dim: settings.dimensions,
            batch_size: settings.batch_size,
            timeout,
            retry,
        })
    }

    /// Only the text-embedding-3 family accepts a `dimensions` parameter.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model.starts_with("text-embedding-3").then_some(self.dim)
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest { model: &self.model, input: texts, dimensions: self.requested_dimensions() };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("embedding response parse error: {e}")))?;
        restore_order(parsed, texts.len(), self.dim)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout { operation: "embedding request", after: self.timeout }
        } else {
            Error::Transient(format!("embedding request failed: {e}"))
        }
    }
}

fn classify_status(status: StatusCode, body: &str) -> Error {
    let detail = format!("embedding API returned {status}: {}", body.chars().take(300).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::MissingCredentials(detail),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Error::Transient(detail),
        s if s.is_server_error() => Error::Transient(detail),
        // Rejected input (e.g. over the context length) or a wrong endpoint:
        // retrying will not help, but a query can still degrade around it.
        _ => Error::Backend(detail),
    }
}

/// Reorder response items by their `index` and check count and width.
fn restore_order(response: EmbedResponse, expected: usize, dim: usize) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(Error::Backend(format!("expected {expected} embeddings, got {}", response.data.len())));
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        if item.embedding.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: item.embedding.len() });
        }
        let slot = slots
            .get_mut(item.index)
            .filter(|s| s.is_none())
            .ok_or_else(|| Error::Backend(format!("invalid or duplicate embedding index {}", item.index)))?;
        *slot = Some(item.embedding);
    }
    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| Error::Backend("embedding response is missing an index".into()))
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str { &self.model_id }

    fn dim(&self) -> usize { self.dim }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.retry.run("embedding request", || self.request_batch(batch)).await?;
            debug!(batch = batch.len(), "embedded batch");
            out.extend(vectors);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EmbeddingSettings { EmbeddingSettings { dimensions: 3, ..EmbeddingSettings::default() } }

    fn response(items: &[(usize, Vec<f32>)]) -> EmbedResponse {
        EmbedResponse { data: items.iter().map(|(index, e)| EmbedData { index: *index, embedding: e.clone() }).collect() }
    }

    #[test]
    fn missing_or_placeholder_keys_are_rejected() {
        for key in ["", "   ", "sk-placeholder-123"] {
            let err = OpenAiEmbedder::with_api_key(&settings(), key.to_string(), RetryPolicy::no_retry()).err();
            assert!(matches!(err, Some(Error::MissingCredentials(_))), "key {key:?}");
        }
        let ok = OpenAiEmbedder::with_api_key(&settings(), "sk-live".into(), RetryPolicy::no_retry()).expect("embedder");
        assert_eq!(ok.dim(), 3);
        assert_eq!(ok.model_id(), "openai:text-embedding-3-small:d3");
        assert_eq!(ok.requested_dimensions(), Some(3));
    }

    #[test]
    fn response_order_is_restored_by_index() {
        let r = response(&[(1, vec![1.0, 1.0, 1.0]), (0, vec![0.0, 0.0, 0.0])]);
        let out = restore_order(r, 2, 3).expect("ordered");
        assert_eq!(out, vec![vec![0.0; 3], vec![1.0; 3]]);
    }

    #[test]
    fn wrong_width_count_or_index_is_an_error() {
        let narrow = response(&[(0, vec![1.0, 2.0])]);
        assert!(matches!(restore_order(narrow, 1, 3), Err(Error::DimensionMismatch { expected: 3, actual: 2 })));
        assert!(restore_order(response(&[(0, vec![0.0; 3])]), 2, 3).is_err());
        assert!(restore_order(response(&[(0, vec![0.0; 3]), (0, vec![0.0; 3])]), 2, 3).is_err());
        assert!(restore_order(response(&[(5, vec![0.0; 3])]), 1, 3).is_err());
    }

    #[test]
    fn statuses_map_to_error_classes() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, ""), Error::MissingCredentials(_)));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        for status in [StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND, StatusCode::UNPROCESSABLE_ENTITY] {
            let err = classify_status(status, "maximum context length");
            assert!(matches!(err, Error::Backend(_)), "{status}");
            assert!(!err.is_fatal() && !err.is_transient(), "{status}");
        }
    }

    #[test]
    fn request_body_matches_the_api() {
        let input = vec!["a".to_string()];
        let body = serde_json::to_value(EmbedRequest { model: "m", input: &input, dimensions: None }).expect("json");
        assert_eq!(body, serde_json::json!({ "model": "m", "input": ["a"] }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let s = EmbeddingSettings { endpoint: "http://127.0.0.1:9/v1/embeddings".into(), timeout_ms: 2_000, ..settings() };
        let e = OpenAiEmbedder::with_api_key(&s, "sk-live".into(), RetryPolicy::no_retry()).expect("embedder");
        let err = e.embed("hello").await.expect_err("nothing listens on port 9");
        assert!(err.is_transient() || matches!(err, Error::RetryExhausted { .. }), "{err}");
    }
}
