//! gridrag-vector
//!
//! `VectorIndex` backends: a LanceDB table (`lance`) and an in-memory
//! brute-force index (`memory`), plus the arrow schema they share.
pub mod schema;
pub mod table;
pub mod lance;
pub mod memory;

pub use lance::LanceVectorIndex;
pub use memory::MemoryVectorIndex;
