//! Final ordering of fused candidates with a cross-encoder.

use std::sync::Arc;

use tracing::warn;

use crate::llm::CrossEncoder;
use crate::models::Fragment;

/// Scores `(query, fragment)` pairs and sorts by the raw logit.
///
/// Without a model, or when a scoring call fails, fragments keep their
/// incoming order with a score of 0.0.
pub struct Reranker {
    model: Option<Arc<dyn CrossEncoder>>,
}

impl Reranker {
    pub fn new(model: Option<Arc<dyn CrossEncoder>>) -> Self {
        if model.is_none() {
            warn!("No cross-encoder available, reranking disabled");
        }
        Self { model }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    pub fn rerank(&self, query: &str, fragments: Vec<Fragment>) -> Vec<(Fragment, f32)> {
        let Some(model) = &self.model else {
            return pass_through(fragments);
        };
        if fragments.is_empty() {
            return Vec::new();
        }

        let texts: Vec<&str> = fragments.iter().map(|f| f.text.as_str()).collect();
        let scores = match model.score(query, &texts) {
            Ok(scores) if scores.len() == fragments.len() => scores,
            Ok(scores) => {
                warn!(
                    "Cross-encoder returned {} scores for {} fragments, keeping fused order",
                    scores.len(),
                    fragments.len()
                );
                return pass_through(fragments);
            }
            Err(e) => {
                warn!("Cross-encoder scoring failed, keeping fused order: {e:#}");
                return pass_through(fragments);
            }
        };

        let mut scored: Vec<(Fragment, f32)> = fragments.into_iter().zip(scores).collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
    }
}

fn pass_through(fragments: Vec<Fragment>) -> Vec<(Fragment, f32)> {
    fragments.into_iter().map(|f| (f, 0.0)).collect()
}
