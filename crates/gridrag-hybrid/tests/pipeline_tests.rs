use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use gridrag_core::chunking::{page_breaks_from_form_feeds, Chunker, ChunkingConfig};
use gridrag_core::error::Error;
use gridrag_core::filter::SearchFilter;
use gridrag_core::traits::{EmbeddingProvider, FullTextIndex};
use gridrag_core::types::{Chunk, DocumentSource, DocumentType, ScoredChunk, SourceDocument};
use gridrag_embed::FakeEmbedder;
use gridrag_hybrid::{
    DocumentPipeline, HybridRetriever, IngestionJob, IngestionQueue, JobId, JobStatus, RetrievalRequest, RetrieverConfig,
    DEFAULT_LIST_LIMIT,
};
use gridrag_text::TantivyIndex;
use gridrag_vector::MemoryVectorIndex;

const DIM: usize = 64;

struct Stack {
    pipeline: Arc<DocumentPipeline>,
    retriever: HybridRetriever,
    text: Arc<TantivyIndex>,
    vectors: Arc<MemoryVectorIndex>,
}

fn stack() -> Stack {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbedder::new(DIM).expect("embedder"));
    let vectors = Arc::new(MemoryVectorIndex::new(DIM));
    let text = Arc::new(TantivyIndex::in_memory().expect("text index"));
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 30, chunk_overlap: 10 }).expect("chunker");
    let pipeline = DocumentPipeline::new(chunker, embedder.clone(), vectors.clone(), text.clone()).expect("pipeline");
    let retriever = HybridRetriever::new(embedder, vectors.clone(), text.clone(), RetrieverConfig::default()).expect("retriever");
    Stack { pipeline: Arc::new(pipeline), retriever, text, vectors }
}

fn grid_code() -> (SourceDocument, String) {
    let doc = SourceDocument::new("grid-code-2023", "Grid Code 2023")
        .with_origin(DocumentSource::Era)
        .with_doc_type(DocumentType::Regulatory);
    let page1 = "Licensees shall report transmission losses every month. Reports are reviewed by the regulator. \
                 Late reports attract penalties under the licence conditions.";
    let page2 = "Frequency must be kept between 49.5 and 50.5 hertz. The system operator dispatches reserves \
                 when frequency deviates. Load shedding is a last resort.";
    (doc, format!("{page1}\x0c{page2}"))
}

fn annual_report() -> (SourceDocument, String) {
    let doc = SourceDocument::new("annual-2023", "Annual Report 2023")
        .with_origin(DocumentSource::Uetcl)
        .with_doc_type(DocumentType::Report);
    let text = "The company commissioned two substations this year. Transmission losses fell to 3.1 percent. \
                Customer connections grew steadily across the northern region.";
    (doc, text.to_string())
}

#[tokio::test]
async fn ingest_then_retrieve_with_citations() {
    let s = stack();
    let (doc, text) = grid_code();
    let report = s.pipeline.ingest(&doc, &text, &page_breaks_from_form_feeds(&text)).await.expect("ingest");
    assert!(report.chunks >= 2);
    assert_eq!(report.last_page, Some(2));
    let (doc2, text2) = annual_report();
    s.pipeline.ingest(&doc2, &text2, &[]).await.expect("ingest annual");

    let response = s.retriever.retrieve(&RetrievalRequest::new("frequency reserves", 3)).await.expect("retrieve");
    assert!(!response.results.is_empty());
    let top = &response.results[0];
    assert_eq!(top.chunk.document_id, "grid-code-2023");
    assert_eq!(top.citation, "[era - Grid Code 2023 p.2]");
    assert!(top.keyword_rank.is_some());
    assert!(response.results.len() <= 3);

    let filtered = s
        .retriever
        .retrieve(&RetrievalRequest::new("transmission losses", 5).with_filter(SearchFilter::none().with_source(DocumentSource::Uetcl)))
        .await
        .expect("filtered");
    assert!(!filtered.results.is_empty());
    assert!(filtered.results.iter().all(|r| r.chunk.document_id == "annual-2023"));
    assert_eq!(filtered.results[0].citation, "[uetcl - Annual Report 2023]");
}

#[tokio::test]
async fn delete_removes_from_both_indexes() {
    let s = stack();
    let (doc, text) = grid_code();
    let ingested = s.pipeline.ingest(&doc, &text, &[]).await.expect("ingest");

    let report = s.pipeline.delete("grid-code-2023").await.expect("delete");
    assert_eq!(report.chunks_deleted, ingested.chunks);
    assert_eq!(report.vectors_deleted, ingested.chunks);
    assert!(s.text.chunks_for_document("grid-code-2023").await.expect("chunks").is_empty());
    assert!(s.vectors.is_empty().await);

    assert!(matches!(s.pipeline.delete("grid-code-2023").await, Err(Error::NotFound(_))));
    let response = s.retriever.retrieve(&RetrievalRequest::new("transmission losses", 5)).await.expect("retrieve");
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn reindex_replaces_old_chunks() {
    let s = stack();
    let (doc, text) = grid_code();
    let first = s.pipeline.ingest(&doc, &text, &[]).await.expect("ingest");

    let revised = "Licensees shall report transmission losses every quarter.";
    let report = s.pipeline.reindex(&doc, revised, &[]).await.expect("reindex");
    assert_eq!(report.old_chunks, first.chunks);
    assert_eq!(report.new_chunks, 1);

    let stored = s.text.chunks_for_document("grid-code-2023").await.expect("chunks");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, revised);
    assert_eq!(s.vectors.len().await, 1);
    let hits = s.text.search("frequency", 5, &SearchFilter::none()).await.expect("search");
    assert!(hits.is_empty(), "old passages are gone");
}

#[tokio::test]
async fn empty_documents_are_rejected() {
    let s = stack();
    let doc = SourceDocument::new("blank", "Blank");
    assert!(matches!(s.pipeline.ingest(&doc, "  \n ", &[]).await, Err(Error::Operation(_))));
    assert!(matches!(s.pipeline.ingest(&SourceDocument::new(" ", "x"), "text.", &[]).await, Err(Error::InvalidRequest(_))));
}

/// A text index whose writes always fail.
struct ReadOnlyText;

#[async_trait]
impl FullTextIndex for ReadOnlyText {
    async fn index(&self, _chunks: &[Chunk]) -> gridrag_core::error::Result<()> { Err(Error::Backend("disk full".into())) }
    async fn search(&self, _query: &str, _top_k: usize, _filter: &SearchFilter) -> gridrag_core::error::Result<Vec<ScoredChunk>> {
        Ok(vec![])
    }
    async fn delete_by_document(&self, _document_id: &str) -> gridrag_core::error::Result<usize> { Ok(0) }
}

#[tokio::test]
async fn failed_text_indexing_rolls_back_vectors() {
    let embedder = Arc::new(FakeEmbedder::new(DIM).expect("embedder"));
    let vectors = Arc::new(MemoryVectorIndex::new(DIM));
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 30, chunk_overlap: 10 }).expect("chunker");
    let pipeline = DocumentPipeline::new(chunker, embedder, vectors.clone(), Arc::new(ReadOnlyText)).expect("pipeline");

    let (doc, text) = grid_code();
    let err = pipeline.ingest(&doc, &text, &[]).await.expect_err("text index rejects writes");
    assert!(matches!(err, Error::Backend(ref m) if m.contains("disk full")));
    assert!(vectors.is_empty().await, "no orphan vectors are left behind");
}

#[test]
fn pipeline_checks_dimensions() {
    let embedder = Arc::new(FakeEmbedder::new(32).expect("embedder"));
    let vectors = Arc::new(MemoryVectorIndex::new(DIM));
    let text = Arc::new(TantivyIndex::in_memory().expect("text index"));
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let err = DocumentPipeline::new(chunker, embedder, vectors, text).err();
    assert!(matches!(err, Some(Error::DimensionMismatch { expected: DIM, actual: 32 })));
}

async fn wait_terminal(queue: &IngestionQueue, id: &JobId) -> IngestionJob {
    for _ in 0..500 {
        if let Some(job) = queue.status(id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn queue_runs_jobs_in_order_and_reports_status() {
    let s = stack();
    let queue = IngestionQueue::start(s.pipeline.clone());
    let (doc, text) = grid_code();
    let ok = queue.submit(doc, text, vec![]).expect("submit");
    let bad = queue.submit(SourceDocument::new("empty", "Empty"), String::new(), vec![]).expect("submit");

    let queued = queue.status(&ok).expect("known job");
    assert_eq!(queued.document_id, "grid-code-2023");

    let done = wait_terminal(&queue, &ok).await;
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.progress, 100);
    assert!(done.chunks_count.unwrap_or_default() >= 2);
    assert!(done.completed_at.is_some());
    assert!(done.updated_at >= done.created_at);

    let failed = wait_terminal(&queue, &bad).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap_or_default().contains("no chunks"));

    let listed: Vec<_> = queue.list(DEFAULT_LIST_LIMIT).iter().map(|j| j.id).collect();
    assert_eq!(listed, vec![bad, ok], "newest first");
    assert_eq!(queue.list(1).len(), 1);
    assert!(queue.status(&JobId::nil()).is_none());
    queue.shutdown().await.expect("shutdown");
    assert!(!s.text.chunks_for_document("grid-code-2023").await.expect("chunks").is_empty());
}

#[tokio::test]
async fn queue_forgets_the_oldest_finished_jobs() {
    let s = stack();
    let queue = IngestionQueue::with_retention(s.pipeline.clone(), 2);
    let ids: Vec<JobId> = (0..4)
        .map(|i| queue.submit(SourceDocument::new(format!("blank-{i}"), "Blank"), String::new(), vec![]).expect("submit"))
        .collect();

    // FIFO: once the last job is done every earlier one is too.
    let last = wait_terminal(&queue, &ids[3]).await;
    assert_eq!(last.status, JobStatus::Failed);

    let listed: Vec<_> = queue.list(10).iter().map(|j| j.id).collect();
    assert_eq!(listed, vec![ids[3], ids[2]]);
    assert!(queue.status(&ids[0]).is_none());
    assert!(queue.status(&ids[1]).is_none());
    queue.shutdown().await.expect("shutdown");
}
