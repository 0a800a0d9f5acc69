//! LLM relevance filter applied to fused candidates before reranking.
//!
//! Each candidate gets an independent YES/NO judgment. The stage is
//! all-or-nothing: if any call fails or any answer can't be read, the
//! candidate list passes through untouched.

use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use rayon::ThreadPool;
use regex::Regex;
use tracing::{debug, warn};

use crate::llm::LanguageModel;
use crate::models::Fragment;

/// Maximum concurrent judgment calls.
const FILTER_CONCURRENCY: usize = 4;

/// Fragment text sent per judgment.
const MAX_SNIPPET_CHARS: usize = 1_500;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid word regex"));

pub struct CompressionFilter {
    llm: Arc<dyn LanguageModel>,
    /// Dedicated pool so judgment calls never occupy the global rayon pool.
    pool: ThreadPool,
}

impl CompressionFilter {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(FILTER_CONCURRENCY)
            .thread_name(|i| format!("compression-{i}"))
            .build()
            .context("Failed to build compression filter thread pool")?;
        Ok(Self { llm, pool })
    }

    /// Keep only fragments the model judges relevant to `query`.
    pub fn filter(&self, query: &str, fragments: Vec<Fragment>) -> Vec<Fragment> {
        if fragments.is_empty() {
            return fragments;
        }

        match self.judge_all(query, &fragments) {
            Ok(verdicts) => {
                let before = fragments.len();
                let kept: Vec<Fragment> = fragments
                    .into_iter()
                    .zip(verdicts)
                    .filter_map(|(f, relevant)| relevant.then_some(f))
                    .collect();
                debug!("Compression filter kept {}/{before} fragments", kept.len());
                kept
            }
            Err(e) => {
                warn!("Compression filter skipped: {e:#}");
                fragments
            }
        }
    }

    /// Verdicts in input order; the first failure aborts the rest.
    fn judge_all(&self, query: &str, fragments: &[Fragment]) -> Result<Vec<bool>> {
        self.pool.install(|| {
            fragments
                .par_iter()
                .map(|fragment| {
                    let prompt = build_filter_prompt(query, &fragment.text);
                    let response = self
                        .llm
                        .complete(&prompt)
                        .context("Relevance judgment call failed")?;
                    parse_verdict(&response)
                })
                .collect::<Result<Vec<bool>>>()
        })
    }
}

fn build_filter_prompt(query: &str, content: &str) -> String {
    let snippet = truncate_chars(content, MAX_SNIPPET_CHARS);
    format!(
        "Визнач, чи містить наведений фрагмент документа інформацію, корисну для відповіді на запитання.\n\
         Відповідай лише одним словом: ТАК або НІ (YES або NO).\n\n\
         > Запитання: {query}\n\
         > Фрагмент:\n>>>\n{snippet}\n>>>\n\
         > Релевантний (ТАК / НІ):"
    )
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

/// Read a YES/NO verdict. Exactly one polarity must be present.
fn parse_verdict(response: &str) -> Result<bool> {
    let upper = response.to_uppercase();
    let mut yes = false;
    let mut no = false;
    for word in WORD.find_iter(&upper) {
        match word.as_str() {
            "YES" | "ТАК" => yes = true,
            "NO" | "НІ" => no = true,
            _ => {}
        }
    }

    match (yes, no) {
        (true, false) => Ok(true),
        (false, true) => Ok(false),
        _ => anyhow::bail!("Ambiguous relevance verdict: {}", response.trim()),
    }
}
