//! Error types for the retrieval core.
//!
//! External-call plumbing (HTTP clients, tantivy, the JSON store) returns
//! `anyhow::Result`; the pipeline surface maps those into [`RagError`] so
//! callers can tell a degenerate request apart from a broken backend.

use thiserror::Error;

/// Errors surfaced to callers of the pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// `index` was called with an empty document list.
    #[error("No documents to index")]
    NoDocuments,
    /// New documents were found but chunking produced nothing to store.
    #[error("Documents produced no fragments to index")]
    NoFragments,
    /// The store has fragments but none of them can be searched.
    #[error("Fragment store holds {total} fragments but none are searchable")]
    NoValidFragments { total: usize },
    /// A query arrived before the indexes were ever built.
    #[error("Retrieval indexes have not been built")]
    NotInitialized,
    /// A runtime parameter update was outside its allowed range.
    #[error("Parameter {name} = {value} is outside the allowed range {range}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        range: String,
    },
    /// A blocking task on the worker pool panicked or was cancelled.
    #[error("Worker pool task failed: {0}")]
    WorkerPool(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type RagResult<T> = std::result::Result<T, RagError>;

/// Failure of the structured chunker for a single document.
///
/// Always recovered from by switching that document to the recursive
/// fallback splitter.
#[derive(Debug, Clone, Error)]
pub enum ChunkingError {
    #[error("Sentence segmentation failed: {0}")]
    Segmentation(String),
    #[error("Deduplication failed: {0}")]
    Deduplication(String),
}
