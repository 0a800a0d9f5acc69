//! # regdoc-rag
//!
//! Question answering over university regulatory documents (Ukrainian
//! statutes, regulations and orders), built from hybrid BM25 + vector
//! retrieval, cross-encoder reranking and an LLM that answers from the
//! retrieved fragments only.
//!
//! ## Architecture
//!
//! ```text
//!   documents_dir (.txt / .md)
//!          │
//!          ▼
//!   ┌──────────────────────┐     ┌──────────────────────┐
//!   │  Structured chunker  │────►│  Recursive fallback  │  (on failure)
//!   │  sections/sentences  │     └──────────┬───────────┘
//!   └──────────┬───────────┘                │
//!              └──────────────┬─────────────┘
//!                             ▼
//!                   ┌──────────────────┐
//!                   │ Embed + store    │  fragments.json
//!                   └────────┬─────────┘
//!                            │ rebuild
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!      ┌──────────────┐            ┌──────────────┐
//!      │ BM25 (RAM)   │            │ Vector index │
//!      └──────┬───────┘            └──────┬───────┘
//!             └────────────┬──────────────┘
//!                          ▼
//!              ┌──────────────────────┐
//!   query ───► │ Weighted RRF (k=60)  │
//!              └──────────┬───────────┘
//!                         ▼
//!              ┌──────────────────────┐
//!              │ LLM compression (opt)│
//!              └──────────┬───────────┘
//!                         ▼
//!              ┌──────────────────────┐
//!              │ Cross-encoder rerank │
//!              └──────────┬───────────┘
//!                         ▼
//!              ┌──────────────────────┐
//!              │ Prompt → LLM answer  │  blocking or token stream
//!              └──────────────────────┘
//! ```
//!
//! Every query is validated (length, ethics, domain relevance) before
//! retrieval runs.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration and runtime-tunable retrieval parameters
//! - [`models`] - Documents, fragments, retrieval results, answers and stream events
//! - [`error`] - Pipeline error type
//! - [`documents`] - Loading extracted document text from disk
//! - [`chunking`] - Structure-aware sentence chunking with deduplication and a recursive fallback
//! - [`store`] - Fragment store trait with in-memory and JSON-file implementations
//! - [`search::bm25`] - BM25 full-text index powered by tantivy
//! - [`search::vector`] - In-memory vector index with cosine similarity
//! - [`search::hybrid`] - Weighted Reciprocal Rank Fusion
//! - [`search::rerank`] - Cross-encoder reranking with pass-through fallback
//! - [`search::retriever`] - The hybrid retriever tying the indexes together
//! - [`llm`] - Embedding, cross-encoder and chat model capabilities and their HTTP clients
//! - [`pipeline`] - Validation, prompting, answering, streaming and evaluation
//! - [`state`] - Async application state running the pipeline on the blocking pool

pub mod chunking;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod state;
pub mod store;
