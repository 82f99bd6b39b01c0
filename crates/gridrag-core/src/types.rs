//! Domain types shared by the chunker, the indexes and the retriever.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;

/// Publisher of a source document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Uetcl,
    Era,
    Memd,
    WorldBank,
    Other,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uetcl => "uetcl",
            Self::Era => "era",
            Self::Memd => "memd",
            Self::WorldBank => "world_bank",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for DocumentSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uetcl" => Ok(Self::Uetcl),
            "era" => Ok(Self::Era),
            "memd" => Ok(Self::Memd),
            "world_bank" => Ok(Self::WorldBank),
            "other" => Ok(Self::Other),
            other => Err(Error::InvalidRequest(format!("unknown document source '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Strategy,
    Regulatory,
    Technical,
    Report,
    Policy,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategy => "strategy",
            Self::Regulatory => "regulatory",
            Self::Technical => "technical",
            Self::Report => "report",
            Self::Policy => "policy",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for DocumentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strategy" => Ok(Self::Strategy),
            "regulatory" => Ok(Self::Regulatory),
            "technical" => Ok(Self::Technical),
            "report" => Ok(Self::Report),
            "policy" => Ok(Self::Policy),
            "other" => Ok(Self::Other),
            other => Err(Error::InvalidRequest(format!("unknown document type '{other}'"))),
        }
    }
}

/// Metadata of a document handed to ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    pub document_id: String,
    pub name: String,
    pub origin: DocumentSource,
    pub doc_type: DocumentType,
}

impl SourceDocument {
    pub fn new(document_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), name: name.into(), origin: DocumentSource::Other, doc_type: DocumentType::Other }
    }

    pub fn with_origin(mut self, origin: DocumentSource) -> Self { self.origin = origin; self }

    pub fn with_doc_type(mut self, doc_type: DocumentType) -> Self { self.doc_type = doc_type; self }

    /// Short label used in citations, e.g. `era - Grid Code`.
    pub fn source_label(&self) -> String { format!("{} - {}", self.origin, self.name) }
}

/// A chunk of a source document that is independently indexed.
///
/// - `id`: `"{document_id}:{chunk_index}"`, the key used for fusion
/// - `text`: trimmed passage text
/// - `char_start`/`char_end`: byte range in the extracted document text,
///   including the whitespace that separates this passage from the next
/// - `page`: 1-based page of `char_start`, when page breaks were known
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub source: Option<String>,
    pub page: Option<u32>,
    pub char_start: usize,
    pub char_end: usize,
    pub origin: Option<DocumentSource>,
    pub doc_type: Option<DocumentType>,
}

impl Chunk {
    pub fn make_id(document_id: &str, chunk_index: usize) -> ChunkId { format!("{document_id}:{chunk_index}") }
}

/// A passage produced by the chunker before it is bound to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Semantic,
    Keyword,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Semantic => "semantic", Self::Keyword => "keyword" })
    }
}

/// A backend hit. `score` is engine-specific but higher is always better.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Vector index payload: a chunk and its embedding.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A hit with its 1-based position in one source list.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub chunk_id: ChunkId,
    pub rank: u32,
    pub score: f32,
    pub search_type: SearchType,
    pub chunk: Chunk,
}

/// A fused, truncated and cited retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub chunk_id: ChunkId,
    pub rrf_score: f64,
    pub semantic_rank: Option<u32>,
    pub keyword_rank: Option<u32>,
    pub chunk: Chunk,
    pub citation: String,
}

/// A sub-search that was dropped from a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub search_type: SearchType,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResponse {
    pub results: Vec<FusedResult>,
    pub degraded: Vec<Degradation>,
}

impl RetrievalResponse {
    pub fn empty() -> Self { Self::default() }

    /// True when the results were built from only part of the backends.
    pub fn is_degraded(&self) -> bool { !self.degraded.is_empty() }
}
