//! Document lifecycle: ingest, delete and reindex across both indexes.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use gridrag_core::chunking::Chunker;
use gridrag_core::error::{Error, Result};
use gridrag_core::traits::{EmbeddingProvider, FullTextIndex, VectorIndex};
use gridrag_core::types::{SourceDocument, VectorRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    /// Highest page a chunk starts on, when page breaks were given.
    pub last_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub document_id: String,
    pub chunks_deleted: usize,
    pub vectors_deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub document_id: String,
    pub old_chunks: usize,
    pub new_chunks: usize,
}

pub struct DocumentPipeline {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    text: Arc<dyn FullTextIndex>,
}

impl DocumentPipeline {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        text: Arc<dyn FullTextIndex>,
    ) -> Result<Self> {
        if embedder.dim() != vectors.dim() {
            return Err(Error::DimensionMismatch { expected: vectors.dim(), actual: embedder.dim() });
        }
        Ok(Self { chunker, embedder, vectors, text })
    }

    pub async fn ingest(&self, doc: &SourceDocument, text: &str, page_breaks: &[usize]) -> Result<IngestReport> {
        self.ingest_with_progress(doc, text, page_breaks, &|_| {}).await
    }

    /// Like [`Self::ingest`], reporting a completion percentage after each stage.
    pub async fn ingest_with_progress(
        &self,
        doc: &SourceDocument,
        text: &str,
        page_breaks: &[usize],
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<IngestReport> {
        if doc.document_id.trim().is_empty() {
            return Err(Error::InvalidRequest("document_id must not be empty".into()));
        }
        let chunks = self.chunker.chunk_document(doc, text, page_breaks)?;
        if chunks.is_empty() {
            return Err(Error::Operation(format!("document '{}' produced no chunks", doc.document_id)));
        }
        progress(20);

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::Backend(format!("expected {} embeddings, got {}", chunks.len(), vectors.len())));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.vectors.dim()) {
            return Err(Error::DimensionMismatch { expected: self.vectors.dim(), actual: bad.len() });
        }
        progress(60);

        let records: Vec<VectorRecord> =
            chunks.iter().cloned().zip(vectors).map(|(chunk, vector)| VectorRecord { chunk, vector }).collect();
        self.vectors.upsert(&records).await?;
        progress(80);
        if let Err(e) = self.text.index(&chunks).await {
            // Drop the vectors again so dense search cannot return chunks the text store lacks.
            match self.vectors.delete_by_document(&doc.document_id).await {
                Ok(removed) => warn!(document_id = %doc.document_id, removed, error = %e, "text indexing failed, vectors rolled back"),
                Err(rollback) => {
                    error!(document_id = %doc.document_id, error = %e, rollback_error = %rollback, "text indexing failed and vector rollback failed")
                }
            }
            return Err(e);
        }
        progress(95);

        let report = IngestReport {
            document_id: doc.document_id.clone(),
            chunks: chunks.len(),
            last_page: chunks.iter().filter_map(|c| c.page).max(),
        };
        info!(document_id = %report.document_id, chunks = report.chunks, "ingested document");
        Ok(report)
    }

    pub async fn delete(&self, document_id: &str) -> Result<DeleteReport> {
        let vectors_deleted = self.vectors.delete_by_document(document_id).await?;
        let chunks_deleted = self.text.delete_by_document(document_id).await?;
        if vectors_deleted == 0 && chunks_deleted == 0 {
            return Err(Error::NotFound(format!("document '{document_id}'")));
        }
        info!(document_id, chunks_deleted, vectors_deleted, "deleted document");
        Ok(DeleteReport { document_id: document_id.to_string(), chunks_deleted, vectors_deleted })
    }

    /// Replace every chunk of a document. An unknown document is simply ingested.
    pub async fn reindex(&self, doc: &SourceDocument, text: &str, page_breaks: &[usize]) -> Result<ReindexReport> {
        let old_chunks = match self.delete(&doc.document_id).await {
            Ok(report) => report.chunks_deleted.max(report.vectors_deleted),
            Err(Error::NotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        let report = self.ingest(doc, text, page_breaks).await?;
        Ok(ReindexReport { document_id: report.document_id, old_chunks, new_chunks: report.chunks })
    }
}
