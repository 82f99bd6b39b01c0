//! Reciprocal Rank Fusion over ranked hit lists.
//!
//! `score(chunk) = Σ 1 / (k + rank)` over the lists that contain the chunk.
//! A list that does not contain a chunk adds nothing. Fusion only looks at
//! ranks, so engine scores on different scales never need normalizing.

use std::collections::HashMap;

use gridrag_core::types::{Chunk, ChunkId, FusedResult, RankedHit, ScoredChunk, SearchType};

pub const DEFAULT_RRF_K: f64 = 60.0;

const UNKNOWN_SOURCE: &str = "Unknown";

/// A fused chunk before truncation, with the rank it had in each list.
#[derive(Debug, Clone, PartialEq)]
pub struct RrfCandidate {
    pub chunk_id: ChunkId,
    pub rrf_score: f64,
    pub semantic_rank: Option<u32>,
    pub keyword_rank: Option<u32>,
    pub chunk: Chunk,
}

impl RrfCandidate {
    fn record_rank(&mut self, search_type: SearchType, rank: u32) {
        let slot = match search_type {
            SearchType::Semantic => &mut self.semantic_rank,
            SearchType::Keyword => &mut self.keyword_rank,
        };
        *slot = Some(slot.map_or(rank, |r| r.min(rank)));
    }
}

/// Assign 1-based ranks in the backend's own order.
pub fn rank_hits(hits: Vec<ScoredChunk>, search_type: SearchType) -> Vec<RankedHit> {
    hits.into_iter()
        .enumerate()
        .map(|(i, h)| RankedHit { chunk_id: h.chunk.id.clone(), rank: i as u32 + 1, score: h.score, search_type, chunk: h.chunk })
        .collect()
}

/// Fuse ranked lists. Output is ordered by descending score with ties broken
/// by ascending chunk id. Within one list only the first (best) occurrence of
/// a chunk counts.
pub fn reciprocal_rank_fusion(lists: &[Vec<RankedHit>], k: f64) -> Vec<RrfCandidate> {
    let mut by_id: HashMap<&str, RrfCandidate> = HashMap::new();
    for list in lists {
        let mut seen: Vec<&str> = Vec::with_capacity(list.len());
        for hit in list {
            if seen.contains(&hit.chunk_id.as_str()) {
                continue;
            }
            seen.push(&hit.chunk_id);
            let contribution = 1.0 / (k + f64::from(hit.rank));
            let entry = by_id.entry(&hit.chunk_id).or_insert_with(|| RrfCandidate {
                chunk_id: hit.chunk_id.clone(),
                rrf_score: 0.0,
                semantic_rank: None,
                keyword_rank: None,
                chunk: hit.chunk.clone(),
            });
            entry.rrf_score += contribution;
            entry.record_rank(hit.search_type, hit.rank);
        }
    }
    let mut fused: Vec<RrfCandidate> = by_id.into_values().collect();
    fused.sort_by(|a, b| b.rrf_score.total_cmp(&a.rrf_score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    fused
}

/// `"[{source} p.{page}]"`, or `"[{source}]"` without a page.
pub fn format_citation(source: Option<&str>, page: Option<u32>) -> String {
    let source = source.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(UNKNOWN_SOURCE);
    match page {
        Some(p) => format!("[{source} p.{p}]"),
        None => format!("[{source}]"),
    }
}

/// Keep the first `top_n` candidates and attach their citations.
pub fn finalize(candidates: Vec<RrfCandidate>, top_n: usize) -> Vec<FusedResult> {
    candidates
        .into_iter()
        .take(top_n)
        .map(|c| FusedResult {
            citation: format_citation(c.chunk.source.as_deref(), c.chunk.page),
            chunk_id: c.chunk_id,
            rrf_score: c.rrf_score,
            semantic_rank: c.semantic_rank,
            keyword_rank: c.keyword_rank,
            chunk: c.chunk,
        })
        .collect()
}
