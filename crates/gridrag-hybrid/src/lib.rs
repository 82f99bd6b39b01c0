//! gridrag-hybrid
//!
//! Hybrid retrieval over any `EmbeddingProvider` + `VectorIndex` +
//! `FullTextIndex`: RRF fusion, the retriever itself, per-mode retrieval
//! policies, the document ingest/delete/reindex pipeline with its
//! background queue, and backend readiness checks.
pub mod fusion;
pub mod health;
pub mod jobs;
pub mod pipeline;
pub mod policy;
pub mod retriever;

pub use fusion::{format_citation, reciprocal_rank_fusion, RrfCandidate, DEFAULT_RRF_K};
pub use health::{check_all, Capabilities, CheckLimits, ServiceHealth, ServiceStatus, SystemHealth};
pub use jobs::{IngestionJob, IngestionQueue, JobId, JobStatus, DEFAULT_LIST_LIMIT, DEFAULT_RETAINED_JOBS};
pub use pipeline::{DeleteReport, DocumentPipeline, IngestReport, ReindexReport};
pub use policy::{ChatMode, ContextBundle, PolicyRetriever, PolicyTable, RetrievalPolicy};
pub use retriever::{HybridRetriever, RetrievalRequest, RetrieverConfig};
