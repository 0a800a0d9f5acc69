//! Model capabilities consumed by the pipeline, and their HTTP clients.
//!
//! The pipeline core is synchronous, so every capability is a plain blocking
//! trait. Async callers reach them through `tokio::task::spawn_blocking`
//! (see `state.rs`).

pub mod chat;
pub mod compression;
pub mod cross_encoder;
pub mod embeddings;
pub mod key_terms;

use anyhow::{Context, Result};

/// Incremental answer text, in generation order.
pub type TokenStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Dense text embedding model. Must be deterministic for a given input.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .context("No embedding returned")
    }
}

/// Pairwise relevance scorer. Scores are raw logits, comparable only within one call.
pub trait CrossEncoder: Send + Sync {
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;
}

/// Text generation model.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Stream the answer piece by piece. Models without native streaming
    /// yield the whole completion as a single item.
    fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let text = self.complete(prompt)?;
        Ok(Box::new(std::iter::once(Ok(text))))
    }
}
