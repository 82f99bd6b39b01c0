use async_trait::async_trait;
use arrow_array::RecordBatchIterator;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, info};

use gridrag_core::error::{Error, Result};
use gridrag_core::filter::SearchFilter;
use gridrag_core::traits::VectorIndex;
use gridrag_core::types::{ScoredChunk, VectorRecord};

use crate::schema::{batch_to_hits, build_arrow_schema, records_to_batch};
use crate::table::{ensure_table, open_db};

/// Vector index over one LanceDB table, cosine distance, brute force.
pub struct LanceVectorIndex {
    _conn: Connection,
    table: Table,
    dim: usize,
}

impl LanceVectorIndex {
    /// Connect to `uri` and open or create `table_name` with vectors of width `dim`.
    pub async fn open(uri: &str, table_name: &str, dim: usize) -> Result<Self> {
        let conn = open_db(uri).await?;
        let table = ensure_table(&conn, table_name, build_arrow_schema(dim)?).await?;
        info!(uri, table = table_name, dim, "opened lancedb vector index");
        Ok(Self { _conn: conn, table, dim })
    }

    pub async fn count(&self) -> Result<usize> { self.table.count_rows(None).await.map_err(Error::backend) }

    fn check_dim(&self, len: usize) -> Result<()> {
        if len != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: len });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    fn dim(&self) -> usize { self.dim }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() { return Ok(()); }
        let batch = records_to_batch(records, self.dim)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let mut mi = self.table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(Error::backend)?;
        debug!(records = records.len(), "upserted vectors");
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize, filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
        self.check_dim(vector.len())?;
        if top_k == 0 || self.count().await? == 0 { return Ok(vec![]); }
        let mut query = self
            .table
            .vector_search(vector.to_vec())
            .map_err(Error::backend)?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = filter.to_sql_predicate() {
            query = query.only_if(predicate);
        }
        let mut stream = query.execute().await.map_err(Error::backend)?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::backend)? {
            for (chunk, distance) in batch_to_hits(&batch)? {
                hits.push(ScoredChunk { chunk, score: 1.0 - distance.unwrap_or(1.0) });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let predicate = SearchFilter::none()
            .with_document_id(document_id)
            .to_sql_predicate()
            .ok_or_else(|| Error::InvalidRequest("empty delete predicate".into()))?;
        let count = self.table.count_rows(Some(predicate.clone())).await.map_err(Error::backend)?;
        if count > 0 {
            self.table.delete(&predicate).await.map_err(Error::backend)?;
            info!(document_id, vectors = count, "deleted document vectors");
        }
        Ok(count)
    }
}
