//! Hybrid retrieval: dense and sparse searches run concurrently, each under
//! its own timeout, and are fused with RRF.
//!
//! A sub-search that fails or times out is replaced by an empty list and
//! reported in [`RetrievalResponse::degraded`]. Only configuration and
//! caller errors, or the loss of both sub-searches, fail the call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use gridrag_core::config::RetrievalSettings;
use gridrag_core::error::{Error, Result};
use gridrag_core::filter::SearchFilter;
use gridrag_core::traits::{EmbeddingProvider, FullTextIndex, VectorIndex};
use gridrag_core::types::{Degradation, RetrievalResponse, ScoredChunk, SearchType};

use crate::fusion::{finalize, rank_hits, reciprocal_rank_fusion, DEFAULT_RRF_K};

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    pub rrf_k: f64,
    pub semantic_k: usize,
    pub keyword_k: usize,
    pub embed_timeout: Duration,
    pub vector_timeout: Duration,
    pub keyword_timeout: Duration,
    /// Fail instead of degrading when either sub-search fails.
    pub require_both: bool,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            semantic_k: 15,
            keyword_k: 15,
            embed_timeout: Duration::from_secs(10),
            vector_timeout: Duration::from_secs(30),
            keyword_timeout: Duration::from_secs(10),
            require_both: false,
        }
    }
}

impl From<&RetrievalSettings> for RetrieverConfig {
    fn from(s: &RetrievalSettings) -> Self {
        Self {
            rrf_k: s.rrf_k,
            semantic_k: s.semantic_k,
            keyword_k: s.keyword_k,
            embed_timeout: Duration::from_millis(s.embed_timeout_ms),
            vector_timeout: Duration::from_millis(s.vector_timeout_ms),
            keyword_timeout: Duration::from_millis(s.keyword_timeout_ms),
            require_both: s.require_both,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_n: usize,
    /// Candidate pool sizes; the retriever's defaults when `None`.
    pub semantic_k: Option<usize>,
    pub keyword_k: Option<usize>,
    pub filter: SearchFilter,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, top_n: usize) -> Self {
        Self { query: query.into(), top_n, semantic_k: None, keyword_k: None, filter: SearchFilter::none() }
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self { self.filter = filter; self }

    pub fn with_pools(mut self, semantic_k: usize, keyword_k: usize) -> Self {
        self.semantic_k = Some(semantic_k);
        self.keyword_k = Some(keyword_k);
        self
    }
}

pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    text: Arc<dyn FullTextIndex>,
    config: RetrieverConfig,
}

async fn with_timeout<T>(operation: &'static str, after: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(after, fut).await.map_err(|_| Error::Timeout { operation, after })?
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        text: Arc<dyn FullTextIndex>,
        config: RetrieverConfig,
    ) -> Result<Self> {
        if embedder.dim() != vectors.dim() {
            return Err(Error::DimensionMismatch { expected: vectors.dim(), actual: embedder.dim() });
        }
        if !(config.rrf_k > 0.0) {
            return Err(Error::InvalidConfig(format!("rrf_k must be positive, got {}", config.rrf_k)));
        }
        Ok(Self { embedder, vectors, text, config })
    }

    pub fn config(&self) -> &RetrieverConfig { &self.config }

    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResponse> {
        if request.top_n == 0 {
            return Err(Error::InvalidRequest("top_n must be positive".into()));
        }
        request.filter.validate()?;
        let query = request.query.trim();
        if query.is_empty() {
            return Ok(RetrievalResponse::empty());
        }
        let semantic_k = request.semantic_k.unwrap_or(self.config.semantic_k).max(request.top_n);
        let keyword_k = request.keyword_k.unwrap_or(self.config.keyword_k).max(request.top_n);

        let (dense, sparse) = tokio::join!(
            self.dense_search(query, semantic_k, &request.filter),
            self.keyword_search(query, keyword_k, &request.filter),
        );
        let mut degraded = Vec::new();
        let (dense, sparse) = self.settle(dense, sparse, &mut degraded)?;
        debug!(query, dense = dense.len(), sparse = sparse.len(), "sub-searches finished");

        let lists = [rank_hits(dense, SearchType::Semantic), rank_hits(sparse, SearchType::Keyword)];
        let results = finalize(reciprocal_rank_fusion(&lists, self.config.rrf_k), request.top_n);
        debug!(results = results.len(), degraded = degraded.len(), "fused results");
        Ok(RetrievalResponse { results, degraded })
    }

    async fn dense_search(&self, query: &str, top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
        let vector = with_timeout("query embedding", self.config.embed_timeout, self.embedder.embed(query)).await?;
        if vector.len() != self.vectors.dim() {
            return Err(Error::DimensionMismatch { expected: self.vectors.dim(), actual: vector.len() });
        }
        with_timeout("vector search", self.config.vector_timeout, self.vectors.search(&vector, top_k, filter)).await
    }

    async fn keyword_search(&self, query: &str, top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
        with_timeout("keyword search", self.config.keyword_timeout, self.text.search(query, top_k, filter)).await
    }

    /// Turn sub-search outcomes into lists, degrading failures where allowed.
    fn settle(
        &self,
        dense: Result<Vec<ScoredChunk>>,
        sparse: Result<Vec<ScoredChunk>>,
        degraded: &mut Vec<Degradation>,
    ) -> Result<(Vec<ScoredChunk>, Vec<ScoredChunk>)> {
        match (dense, sparse) {
            (Ok(d), Ok(s)) => Ok((d, s)),
            (Err(e), _) | (_, Err(e)) if e.is_fatal() => Err(e),
            (Err(d), Err(s)) => Err(Error::RetrievalUnavailable { semantic: d.to_string(), keyword: s.to_string() }),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) if self.config.require_both => Err(e),
            (Err(e), Ok(s)) => {
                warn!(error = %e, "semantic search failed, continuing with keyword results only");
                degraded.push(Degradation { search_type: SearchType::Semantic, reason: e.to_string() });
                Ok((vec![], s))
            }
            (Ok(d), Err(e)) => {
                warn!(error = %e, "keyword search failed, continuing with semantic results only");
                degraded.push(Degradation { search_type: SearchType::Keyword, reason: e.to_string() });
                Ok((d, vec![]))
            }
        }
    }
}
