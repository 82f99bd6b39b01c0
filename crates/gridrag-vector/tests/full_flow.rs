use gridrag_core::error::Error;
use gridrag_core::filter::SearchFilter;
use gridrag_core::traits::VectorIndex;
use gridrag_core::types::{Chunk, DocumentSource, DocumentType, VectorRecord};
use gridrag_vector::LanceVectorIndex;
use tempfile::TempDir;

fn record(document_id: &str, idx: usize, origin: DocumentSource, vector: [f32; 4]) -> VectorRecord {
    VectorRecord {
        chunk: Chunk {
            id: Chunk::make_id(document_id, idx),
            document_id: document_id.into(),
            chunk_index: idx,
            text: format!("{document_id} passage {idx}"),
            source: Some(format!("{origin} - {document_id}")),
            page: Some(idx as u32 + 1),
            char_start: idx * 50,
            char_end: idx * 50 + 49,
            origin: Some(origin),
            doc_type: Some(DocumentType::Strategy),
        },
        vector: vector.to_vec(),
    }
}

fn corpus() -> Vec<VectorRecord> {
    vec![
        record("plan", 0, DocumentSource::Uetcl, [1.0, 0.0, 0.0, 0.0]),
        record("plan", 1, DocumentSource::Uetcl, [0.9, 0.1, 0.0, 0.0]),
        record("code", 0, DocumentSource::Era, [0.0, 1.0, 0.0, 0.0]),
        record("code", 1, DocumentSource::Era, [0.7, 0.7, 0.0, 0.0]),
    ]
}

#[tokio::test]
async fn lancedb_full_flow() {
    let tmp = TempDir::new().expect("tmp");
    let uri = tmp.path().to_string_lossy().to_string();
    let index = LanceVectorIndex::open(&uri, "chunks_test", 4).await.expect("open");
    assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 3, &SearchFilter::none()).await.expect("empty search").is_empty());

    index.upsert(&corpus()).await.expect("upsert");
    assert_eq!(index.count().await.expect("count"), 4);

    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 3, &SearchFilter::none()).await.expect("search");
    let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
    assert_eq!(ids, vec!["plan:0", "plan:1", "code:1"]);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert_eq!(hits[0].chunk, corpus()[0].chunk);

    let era = index.search(&[1.0, 0.0, 0.0, 0.0], 3, &SearchFilter::none().with_source(DocumentSource::Era)).await.expect("filtered");
    assert!(!era.is_empty());
    assert!(era.iter().all(|h| h.chunk.origin == Some(DocumentSource::Era)));

    // Re-upserting an id replaces its row.
    index.upsert(&[record("plan", 1, DocumentSource::Uetcl, [0.0, 0.0, 1.0, 0.0])]).await.expect("replace");
    assert_eq!(index.count().await.expect("count"), 4);

    assert_eq!(index.delete_by_document("plan").await.expect("delete"), 2);
    assert_eq!(index.delete_by_document("plan").await.expect("delete again"), 0);
    assert_eq!(index.count().await.expect("count"), 2);
}

#[tokio::test]
async fn reopening_with_another_dimension_fails() {
    let tmp = TempDir::new().expect("tmp");
    let uri = tmp.path().to_string_lossy().to_string();
    let index = LanceVectorIndex::open(&uri, "chunks", 4).await.expect("open");
    index.upsert(&corpus()).await.expect("upsert");
    let err = LanceVectorIndex::open(&uri, "chunks", 8).await.err();
    assert!(matches!(err, Some(Error::DimensionMismatch { expected: 8, actual: 4 })));
    let err = index.search(&[1.0, 0.0], 1, &SearchFilter::none()).await.err();
    assert!(matches!(err, Some(Error::DimensionMismatch { expected: 4, actual: 2 })));
}
