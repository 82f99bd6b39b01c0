//! Sentence-aware chunking with token budgets, overlap and page attribution.
//!
//! The text is cut into sentence units (`.`, `!` or `?` followed by
//! whitespace). Units are accumulated until the next one would exceed the
//! chunk size; the following chunk re-includes trailing units of the
//! previous one up to the overlap budget. A sentence larger than a whole
//! chunk is replaced by its words so that every chunk stays bounded.
//!
//! Unit ranges are contiguous (each runs to the start of the next unit), so
//! the ranges of consecutive chunks always touch or overlap and together
//! cover the whole input.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::TokenCounter;
use crate::types::{Chunk, SourceDocument, TextSpan};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self { Self { chunk_size: 600, chunk_overlap: 100 } }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// `words / 0.75`, the usual words-per-token approximation.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordApproxCounter;

impl TokenCounter for WordApproxCounter {
    fn count(&self, text: &str) -> usize { (text.split_whitespace().count() as f32 / 0.75) as usize }
}

fn sentence_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static regex"))
}

fn word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\S+").expect("static regex"))
}

#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
}

#[derive(Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> { Self::with_counter(config, Arc::new(WordApproxCounter)) }

    pub fn with_counter(config: ChunkingConfig, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, counter })
    }

    pub fn config(&self) -> &ChunkingConfig { &self.config }

    fn tokens(&self, s: &str) -> usize { self.counter.count(s).max(1) }

    fn units(&self, text: &str) -> Vec<Unit> {
        let mut starts = vec![0usize];
        starts.extend(sentence_break().find_iter(text).map(|m| m.end()).filter(|&e| e < text.len()));

        let mut units = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            let sentence = text[start..end].trim();
            if sentence.is_empty() {
                continue;
            }
            if self.tokens(sentence) <= self.config.chunk_size {
                units.push(Unit { start, end });
                continue;
            }
            // Oversized sentence: fall back to word units over the same range.
            let words: Vec<_> = word().find_iter(&text[start..end]).collect();
            for (j, w) in words.iter().enumerate() {
                let w_start = if j == 0 { start } else { start + w.start() };
                let w_end = words.get(j + 1).map_or(end, |n| start + n.start());
                units.push(Unit { start: w_start, end: w_end });
            }
        }
        units
    }

    /// Split `text` into overlapping passages with their byte ranges.
    pub fn split(&self, text: &str) -> Result<Vec<TextSpan>> {
        if text.trim().is_empty() {
            return Ok(vec![]);
        }
        let units = self.units(text);
        let size = self.config.chunk_size;
        let span = |run: &[Unit]| {
            let (char_start, char_end) = (run[0].start, run[run.len() - 1].end);
            TextSpan { text: text[char_start..char_end].trim().to_string(), char_start, char_end }
        };

        // Budgets are checked on the whole candidate text, never on summed unit
        // counts: counters are not additive.
        let run_tokens = |first: usize, last: usize| self.tokens(text[units[first].start..units[last].end].trim());

        let mut spans = Vec::new();
        let (mut lo, mut hi) = (0usize, 0usize);
        while hi < units.len() {
            if hi > lo && run_tokens(lo, hi) > size {
                spans.push(span(&units[lo..hi]));
                // Carry trailing units within the overlap, leaving room for unit `hi`.
                let mut new_lo = hi;
                while new_lo > lo {
                    let candidate = new_lo - 1;
                    if run_tokens(candidate, hi - 1) > self.config.chunk_overlap || run_tokens(candidate, hi) > size {
                        break;
                    }
                    new_lo = candidate;
                }
                if new_lo <= lo {
                    return Err(Error::Chunking(format!("no progress at unit {hi} of {}", units.len())));
                }
                lo = new_lo;
                continue;
            }
            hi += 1;
        }
        if hi > lo {
            spans.push(span(&units[lo..hi]));
        }
        debug!(units = units.len(), chunks = spans.len(), "split text");
        Ok(spans)
    }

    /// Chunk a document's extracted text into indexed chunks.
    ///
    /// `page_breaks` holds the byte offset at which each page starts.
    pub fn chunk_document(&self, doc: &SourceDocument, text: &str, page_breaks: &[usize]) -> Result<Vec<Chunk>> {
        let source = doc.source_label();
        Ok(self
            .split(text)?
            .into_iter()
            .enumerate()
            .map(|(chunk_index, s)| Chunk {
                id: Chunk::make_id(&doc.document_id, chunk_index),
                document_id: doc.document_id.clone(),
                chunk_index,
                text: s.text,
                source: Some(source.clone()),
                page: page_for_offset(s.char_start, page_breaks),
                char_start: s.char_start,
                char_end: s.char_end,
                origin: Some(doc.origin),
                doc_type: Some(doc.doc_type),
            })
            .collect())
    }
}

/// 1-based page containing `offset`; `None` when no page breaks are known.
pub fn page_for_offset(offset: usize, page_breaks: &[usize]) -> Option<u32> {
    if page_breaks.is_empty() {
        return None;
    }
    let started = page_breaks.iter().filter(|&&b| b <= offset).count();
    Some(started.max(1) as u32)
}

/// Page starts for text whose pages are separated by form feeds.
pub fn page_breaks_from_form_feeds(text: &str) -> Vec<usize> {
    std::iter::once(0).chain(text.match_indices('\x0c').map(|(i, _)| i + 1)).collect()
}
