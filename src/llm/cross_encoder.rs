//! Cross-encoder scoring via an OpenAI-compatible `/v1/rerank` endpoint.
//!
//! One batch request per query scores every (query, text) pair. Scores are
//! returned as the raw `relevance_score` logits in input order; nothing is
//! normalized because only their order within a query matters.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::RerankerConfig;
use crate::llm::CrossEncoder;

pub struct HttpCrossEncoder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
}

impl HttpCrossEncoder {
    /// Fails when no reranker endpoint is configured; callers treat that as
    /// "cross-encoder unavailable".
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .context("Reranker base_url not configured")?;

        let model = config.model.as_deref().unwrap_or("default");

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.min(30)))
            .build()
            .context("Failed to build reranker HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/v1/rerank", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

impl CrossEncoder for HttpCrossEncoder {
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let req_body = RerankRequest {
            model: self.model.clone(),
            query: query.to_string(),
            documents: texts.iter().map(|t| t.to_string()).collect(),
            top_n: texts.len(),
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&req_body)
            .send()
            .context("Failed to reach reranker endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("Reranker returned {status}: {body}");
        }

        let body: RerankResponse = resp
            .json()
            .context("Failed to parse reranker response")?;

        scores_in_input_order(body.results, texts.len())
    }
}

/// Reorder endpoint results (sorted by relevance) back to input order.
fn scores_in_input_order(results: Vec<RerankResultRaw>, expected: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for r in results {
        let slot = scores
            .get_mut(r.index)
            .with_context(|| format!("Reranker returned out-of-range index {}", r.index))?;
        *slot = Some(r.relevance_score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.with_context(|| format!("Reranker returned no score for document {i}")))
        .collect()
}

// ─── Request/Response types ────────────────────────────

#[derive(Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}
