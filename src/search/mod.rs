//! Lexical and dense indexes, rank fusion, reranking and the retriever that
//! ties them together.

pub mod bm25;
pub mod hybrid;
pub mod rerank;
pub mod retriever;
pub mod vector;

pub use retriever::{HybridRetriever, RetrieverSettings};
