use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::filter::SearchFilter;
use crate::types::{Chunk, ScoredChunk, VectorRecord};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model, e.g. `openai:text-embedding-3-small:d1536`.
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    /// Embed a batch of texts. The output order matches the input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Backend(format!("{} returned no embedding", self.model_id())))
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension fixed when the index was created.
    fn dim(&self) -> usize;
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;
    /// Up to `top_k` hits ordered by descending similarity.
    async fn search(&self, vector: &[f32], top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>>;
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;
}

#[async_trait]
pub trait FullTextIndex: Send + Sync {
    /// Insert or replace chunks by id.
    async fn index(&self, chunks: &[Chunk]) -> Result<()>;
    /// Up to `top_k` hits ordered by descending relevance.
    async fn search(&self, query: &str, top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>>;
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;
}

/// Approximate or exact token counts used for chunk sizing.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}
