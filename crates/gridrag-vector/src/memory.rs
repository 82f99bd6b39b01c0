use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use gridrag_core::error::{Error, Result};
use gridrag_core::filter::SearchFilter;
use gridrag_core::traits::VectorIndex;
use gridrag_core::types::{ChunkId, ScoredChunk, VectorRecord};

/// Brute-force cosine index held in memory.
pub struct MemoryVectorIndex {
    dim: usize,
    records: RwLock<HashMap<ChunkId, VectorRecord>>,
}

impl MemoryVectorIndex {
    pub fn new(dim: usize) -> Self { Self { dim, records: RwLock::new(HashMap::new()) } }

    pub async fn len(&self) -> usize { self.records.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.records.read().await.is_empty() }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn dim(&self) -> usize { self.dim }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: bad.vector.len() });
        }
        let mut map = self.records.write().await;
        for r in records {
            map.insert(r.chunk.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: vector.len() });
        }
        let map = self.records.read().await;
        let mut hits: Vec<ScoredChunk> = map
            .values()
            .filter(|r| filter.matches(&r.chunk))
            .map(|r| ScoredChunk { chunk: r.chunk.clone(), score: cosine(vector, &r.vector) })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut map = self.records.write().await;
        let before = map.len();
        map.retain(|_, r| r.chunk.document_id != document_id);
        Ok(before - map.len())
    }
}
