use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the fragment store is persisted
    pub data_dir: PathBuf,
    /// Directory of extracted `.txt` / `.md` documents to index
    pub documents_dir: PathBuf,
    /// Size of the blocking pool that runs pipeline calls
    pub worker_threads: usize,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Cross-encoder reranker configuration
    pub reranker: RerankerConfig,
    /// Runtime-tunable retrieval parameters
    pub rag: RagParameters,
    /// Chunker knobs that are not exposed for runtime updates
    pub chunking: ChunkingOptions,
    /// Candidates fetched per list = top_k * overfetch_factor
    pub overfetch_factor: usize,
    /// Ask the LLM to drop irrelevant fragments before reranking
    pub use_llm_compression: bool,
    /// Ask the LLM to judge ethics/relevance instead of keyword checks
    pub use_llm_validation: bool,
    /// Run the answer evaluator when one is configured
    pub enable_evaluation: bool,
}

/// Configuration for the cross-encoder reranker sidecar (e.g. llama-server serving bge-reranker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Base URL for the reranker API (e.g. "http://127.0.0.1:8082").
    /// If None, reranking passes fused results through unscored.
    pub base_url: Option<String>,
    /// Model name to send in the rerank request.
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30).
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for answers, validation and compression
    pub chat_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Timeout in seconds for blocking model calls; streamed answers only
    /// time out when the server goes quiet
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            chat_model: "qwen2.5:7b".to_string(),
            embedding_model: "bge-m3".to_string(),
            api_key: None,
            timeout_secs: 300,
        }
    }
}

/// Retrieval parameters that can be changed while the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RagParameters {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub rerank_top_k: usize,
    pub bm25_weight: f32,
    pub vector_weight: f32,
}

impl Default for RagParameters {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 128,
            top_k: 5,
            rerank_top_k: 3,
            bm25_weight: 0.3,
            vector_weight: 0.7,
        }
    }
}

pub const CHUNK_SIZE_RANGE: (usize, usize) = (128, 2048);
pub const CHUNK_OVERLAP_RANGE: (usize, usize) = (32, 512);
pub const TOP_K_RANGE: (usize, usize) = (1, 20);
pub const RERANK_TOP_K_RANGE: (usize, usize) = (1, 15);
pub const WEIGHT_RANGE: (f32, f32) = (0.0, 1.0);

fn check_usize(name: &'static str, value: usize, (lo, hi): (usize, usize)) -> RagResult<()> {
    if (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(RagError::InvalidParameter {
            name,
            value: value.to_string(),
            range: format!("[{lo}, {hi}]"),
        })
    }
}

fn check_weight(name: &'static str, value: f32) -> RagResult<()> {
    let (lo, hi) = WEIGHT_RANGE;
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(RagError::InvalidParameter {
            name,
            value: value.to_string(),
            range: format!("[{lo}, {hi}]"),
        })
    }
}

impl RagParameters {
    pub fn validate(&self) -> RagResult<()> {
        check_usize("chunk_size", self.chunk_size, CHUNK_SIZE_RANGE)?;
        check_usize("chunk_overlap", self.chunk_overlap, CHUNK_OVERLAP_RANGE)?;
        // A carry-over as large as the chunk itself would never make progress.
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidParameter {
                name: "chunk_overlap",
                value: self.chunk_overlap.to_string(),
                range: format!("below chunk_size ({})", self.chunk_size),
            });
        }
        check_usize("top_k", self.top_k, TOP_K_RANGE)?;
        check_usize("rerank_top_k", self.rerank_top_k, RERANK_TOP_K_RANGE)?;
        check_weight("bm25_weight", self.bm25_weight)?;
        check_weight("vector_weight", self.vector_weight)?;
        Ok(())
    }
}

/// Partial update of [`RagParameters`]; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub top_k: Option<usize>,
    pub rerank_top_k: Option<usize>,
    pub bm25_weight: Option<f32>,
    pub vector_weight: Option<f32>,
}

impl ParameterUpdate {
    /// Merge into `current`, returning the validated result. `current` is never modified.
    pub fn apply(&self, current: &RagParameters) -> RagResult<RagParameters> {
        let next = RagParameters {
            chunk_size: self.chunk_size.unwrap_or(current.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(current.chunk_overlap),
            top_k: self.top_k.unwrap_or(current.top_k),
            rerank_top_k: self.rerank_top_k.unwrap_or(current.rerank_top_k),
            bm25_weight: self.bm25_weight.unwrap_or(current.bm25_weight),
            vector_weight: self.vector_weight.unwrap_or(current.vector_weight),
        };
        next.validate()?;
        Ok(next)
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_size.is_none()
            && self.chunk_overlap.is_none()
            && self.top_k.is_none()
            && self.rerank_top_k.is_none()
            && self.bm25_weight.is_none()
            && self.vector_weight.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkingOptions {
    /// Fragments shorter than this (in characters) are discarded
    pub min_chunk_size: usize,
    /// Consecutive fragments at or above this cosine similarity are dropped
    pub dedup_threshold: f32,
    /// Texts per embedding request during deduplication and indexing
    pub embedding_batch_size: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            min_chunk_size: 50,
            dedup_threshold: 0.99,
            embedding_batch_size: 128,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            documents_dir: PathBuf::from("./documents"),
            worker_threads: 4,
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            rag: RagParameters::default(),
            chunking: ChunkingOptions::default(),
            overfetch_factor: 2,
            use_llm_compression: false,
            use_llm_validation: false,
            enable_evaluation: true,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {name}={raw:?}: not a number");
            None
        }
    }
}

/// Apply `RAG_*` overrides through the same validation as runtime updates.
///
/// The overrides are tried together first, so related values such as chunk
/// size and overlap can move in one step. If that fails, each one is applied
/// on its own and only the invalid ones are dropped.
fn apply_rag_overrides(current: RagParameters, lookup: impl Fn(&str) -> Option<String>) -> RagParameters {
    let update = ParameterUpdate {
        chunk_size: parse_override(&lookup, "RAG_CHUNK_SIZE"),
        chunk_overlap: parse_override(&lookup, "RAG_CHUNK_OVERLAP"),
        top_k: parse_override(&lookup, "RAG_TOP_K"),
        rerank_top_k: parse_override(&lookup, "RAG_RERANK_TOP_K"),
        bm25_weight: parse_override(&lookup, "RAG_BM25_WEIGHT"),
        vector_weight: parse_override(&lookup, "RAG_VECTOR_WEIGHT"),
    };
    if update.is_empty() {
        return current;
    }

    let e = match update.apply(&current) {
        Ok(params) => return params,
        Err(e) => e,
    };
    warn!("RAG_* overrides rejected together ({e}), applying them one at a time");

    let singles = [
        ("RAG_CHUNK_SIZE", ParameterUpdate { chunk_size: update.chunk_size, ..Default::default() }),
        ("RAG_CHUNK_OVERLAP", ParameterUpdate { chunk_overlap: update.chunk_overlap, ..Default::default() }),
        ("RAG_TOP_K", ParameterUpdate { top_k: update.top_k, ..Default::default() }),
        ("RAG_RERANK_TOP_K", ParameterUpdate { rerank_top_k: update.rerank_top_k, ..Default::default() }),
        ("RAG_BM25_WEIGHT", ParameterUpdate { bm25_weight: update.bm25_weight, ..Default::default() }),
        ("RAG_VECTOR_WEIGHT", ParameterUpdate { vector_weight: update.vector_weight, ..Default::default() }),
    ];
    singles
        .into_iter()
        .filter(|(_, single)| !single.is_empty())
        .fold(current, |params, (name, single)| match single.apply(&params) {
            Ok(next) => next,
            Err(e) => {
                warn!("Ignoring {name}: {e}");
                params
            }
        })
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REGDOC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("REGDOC_DOCUMENTS_DIR") {
            config.documents_dir = PathBuf::from(dir);
        }
        if let Ok(val) = std::env::var("REGDOC_WORKER_THREADS") {
            if let Ok(v) = val.parse::<usize>() {
                config.worker_threads = v.max(1);
            }
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(val) = std::env::var("LLM_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.llm.timeout_secs = v;
            }
        }

        // Reranker config
        if let Ok(url) = std::env::var("RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("RERANKER_MODEL") {
            config.reranker.model = Some(model);
        }
        if let Ok(val) = std::env::var("RERANKER_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.reranker.timeout_secs = v.min(30); // Cap at 30s
            }
        }

        config.rag = apply_rag_overrides(config.rag, |name| std::env::var(name).ok());

        if let Ok(val) = std::env::var("RAG_USE_LLM_COMPRESSION") {
            if let Some(v) = parse_bool(&val) {
                config.use_llm_compression = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_USE_LLM_VALIDATION") {
            if let Some(v) = parse_bool(&val) {
                config.use_llm_validation = v;
            }
        }
        if let Ok(val) = std::env::var("RAG_ENABLE_EVALUATION") {
            if let Some(v) = parse_bool(&val) {
                config.enable_evaluation = v;
            }
        }

        config
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("fragments.json")
    }
}
