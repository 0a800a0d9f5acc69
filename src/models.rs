use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which splitter produced a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplittingMethod {
    StructuredSentences,
    RecursiveFallback,
}

/// A source document with its extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Document identifier, usually the file name.
    pub source: String,
    /// Loader-provided fields (page count, file size, ...) copied onto every fragment.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                extra: BTreeMap::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentMetadata {
    pub source: String,
    pub chunk_index: usize,
    /// Length of the fragment text in characters.
    pub chunk_length: usize,
    pub splitting_method: SplittingMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// A bounded slice of a source document, stored and retrieved as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    pub text: String,
    pub metadata: FragmentMetadata,
}

impl Fragment {
    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

/// A fragment together with its embedding, as persisted by a fragment store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFragment {
    pub fragment: Fragment,
    pub embedding: Vec<f32>,
}

/// A fragment with its final cross-encoder score and 1-based rank.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub fragment: Fragment,
    /// Unnormalized cross-encoder logit; 0.0 when reranking is unavailable.
    pub relevance_score: f32,
    pub rank: usize,
}

/// Outcome of query validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryValidation {
    pub is_valid: bool,
    pub is_relevant: bool,
    pub is_ethical: bool,
    pub rejection_reason: Option<String>,
}

impl QueryValidation {
    pub fn accepted() -> Self {
        Self {
            is_valid: true,
            is_relevant: true,
            is_ethical: true,
            rejection_reason: None,
        }
    }

    pub fn rejected(is_ethical: bool, reason: &str) -> Self {
        Self {
            is_valid: false,
            is_relevant: false,
            is_ethical,
            rejection_reason: Some(reason.to_string()),
        }
    }
}

/// Per-request flags for answer generation.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnswerOptions {
    #[serde(default)]
    pub return_contexts: bool,
    #[serde(default)]
    pub return_evaluation: bool,
}

/// A retrieved fragment as shown to the user alongside an answer.
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub content: String,
    pub preview: String,
    pub length: usize,
    pub metadata: FragmentMetadata,
    pub source: String,
    pub chunk_index: usize,
    pub is_relevant: Option<bool>,
    pub rank: usize,
    pub relevance_score: f32,
    pub key_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub faithfulness: f32,
    pub answer_relevancy: f32,
    pub context_relevancy: f32,
    pub mrr: f32,
    pub map: f32,
    pub overall_score: f32,
}

/// Result of the blocking answer call.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub num_contexts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<ContextInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationMetrics>,
    pub validation_failed: bool,
    pub validation_reason: Option<String>,
}

/// Tagged records produced by the streaming answer mode.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Validation { validation: QueryValidation },
    Contexts { contexts: Vec<ContextInfo> },
    Token { content: String },
    Evaluation { evaluation: EvaluationMetrics },
    Error { message: String },
    Done,
}

/// Fragment counts around an `index` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub fragments_before: usize,
    pub fragments_after: usize,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
}

impl IndexReport {
    pub fn fragments_added(&self) -> usize {
        self.fragments_after.saturating_sub(self.fragments_before)
    }
}
