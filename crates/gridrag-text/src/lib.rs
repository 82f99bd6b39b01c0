//! gridrag-text
//!
//! Tantivy-based keyword index over chunks. Besides BM25 search it keeps the
//! full chunk payload, so it is also where chunks are looked up per document.
pub mod tantivy_utils;
pub mod index;

pub use index::TantivyIndex;
