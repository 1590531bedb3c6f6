//! Search stores and the embedding batcher
//!
//! BM25 keyword index, code/text vector stores, the character-budget
//! embedding batcher, and reciprocal-rank fusion over the stores'
//! rankings. Persistence rides on the kodit-data pool so both dialects
//! behave identically.

pub mod batcher;
pub mod bm25;
pub mod error;
pub mod fusion;
pub mod tokenizer;
pub mod vector;

pub use batcher::{Document, IndexOptions, VectorIndexer};
pub use bm25::{Bm25Store, SearchHit};
pub use error::{SearchError, SearchResult};
pub use fusion::reciprocal_rank_fusion;
pub use vector::{VectorKind, VectorStore};
