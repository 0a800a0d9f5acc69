//! The synchronous retrieval/generation core.
//!
//! [`RagPipeline`] owns the fragment store, the hybrid retriever and the
//! model capabilities. Every method blocks; async callers go through
//! [`AppState`](crate::state::AppState), which moves each call onto the
//! blocking pool.
//!
//! Answering is split into steps so the blocking and streaming modes share
//! one path:
//!
//! ```text
//! prepare (validate → retrieve → prompt) ─► generate / generate_stream ─► evaluate
//! ```

pub mod evaluation;
pub mod prompt;
pub mod validator;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::chunking::{ChunkingConfig, DocumentSplitter};
use crate::config::{ChunkingOptions, Config, ParameterUpdate, RagParameters};
use crate::error::{RagError, RagResult};
use crate::llm::compression::CompressionFilter;
use crate::llm::key_terms::KeyTermExtractor;
use crate::llm::{CrossEncoder, Embedder, LanguageModel, TokenStream};
use crate::models::{
    Answer, AnswerOptions, ContextInfo, Document, EvaluationMetrics, Fragment, IndexReport,
    PipelineEvent, QueryValidation, RetrievalResult, StoredFragment,
};
use crate::search::rerank::Reranker;
use crate::search::{HybridRetriever, RetrieverSettings};
use crate::store::FragmentStore;

use self::evaluation::{
    AnswerEvaluator, EvaluationHistory, EvaluationRecord, EvaluationReport, QualityWeights,
};
use self::validator::QueryValidator;

/// Behaviour switches fixed for the lifetime of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub overfetch_factor: usize,
    pub use_llm_compression: bool,
    pub use_llm_validation: bool,
    pub enable_evaluation: bool,
    pub chunking: ChunkingOptions,
    pub quality_weights: QualityWeights,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            overfetch_factor: 2,
            use_llm_compression: false,
            use_llm_validation: false,
            enable_evaluation: true,
            chunking: ChunkingOptions::default(),
            quality_weights: QualityWeights::default(),
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overfetch_factor: config.overfetch_factor,
            use_llm_compression: config.use_llm_compression,
            use_llm_validation: config.use_llm_validation,
            enable_evaluation: config.enable_evaluation,
            chunking: config.chunking,
            quality_weights: QualityWeights::default(),
        }
    }
}

/// External capabilities the pipeline is built from.
pub struct PipelineBackends {
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn LanguageModel>,
    /// Without one, reranking passes fused results through and key terms are empty.
    pub cross_encoder: Option<Arc<dyn CrossEncoder>>,
    pub store: Arc<dyn FragmentStore>,
    pub evaluator: Option<Arc<dyn AnswerEvaluator>>,
}

/// Validated question with its retrieved context and the answer prompt.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub question: String,
    pub validation: QueryValidation,
    pub results: Vec<RetrievalResult>,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub enum Preparation {
    Rejected(QueryValidation),
    Ready(PreparedQuery),
}

/// A completed answer, before evaluation.
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub prepared: PreparedQuery,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct AnswerEvaluation {
    pub metrics: EvaluationMetrics,
    /// Per-context relevance, in retrieval order.
    pub individual_relevancy: Vec<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub initialized: bool,
    pub stored_fragments: usize,
    pub indexed_fragments: usize,
    pub documents: usize,
    pub parameters: RagParameters,
    pub reranker_enabled: bool,
    pub llm_compression: bool,
    pub llm_validation: bool,
    pub evaluation_enabled: bool,
}

pub struct RagPipeline {
    params: RwLock<RagParameters>,
    options: PipelineOptions,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn FragmentStore>,
    evaluator: Option<Arc<dyn AnswerEvaluator>>,
    retriever: HybridRetriever,
    key_terms: KeyTermExtractor,
    validator: QueryValidator,
    evaluations: Mutex<EvaluationHistory>,
    /// Serializes index, reset and parameter updates.
    index_lock: Mutex<()>,
}

impl RagPipeline {
    pub fn new(params: RagParameters, options: PipelineOptions, backends: PipelineBackends) -> Self {
        let filter = if options.use_llm_compression {
            CompressionFilter::new(backends.llm.clone())
                .map_err(|e| tracing::warn!("LLM compression disabled: {e:#}"))
                .ok()
        } else {
            None
        };
        let retriever = HybridRetriever::new(
            RetrieverSettings::from_parameters(&params, options.overfetch_factor),
            backends.embedder.clone(),
            filter,
            Reranker::new(backends.cross_encoder.clone()),
        );

        Self {
            params: RwLock::new(params),
            key_terms: KeyTermExtractor::new(backends.cross_encoder),
            validator: QueryValidator::new(backends.llm.clone(), options.use_llm_validation),
            options,
            embedder: backends.embedder,
            llm: backends.llm,
            store: backends.store,
            evaluator: backends.evaluator,
            retriever,
            evaluations: Mutex::new(EvaluationHistory::default()),
            index_lock: Mutex::new(()),
        }
    }

    pub fn parameters(&self) -> RagParameters {
        *self.params.read()
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn FragmentStore> {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.retriever.is_initialized()
    }

    // ── Indexing ────────────────────────────────────────────

    /// Rebuild both retrieval indexes from the store.
    ///
    /// An empty store gives an inert retriever. A non-empty store with no
    /// searchable fragment is an error, and also leaves the retriever inert.
    pub fn rebuild_indexes(&self) -> RagResult<usize> {
        let stored = self.store.all()?;
        let total = stored.len();
        let count = self.retriever.rebuild(stored)?;
        if total > 0 && count == 0 {
            return Err(RagError::NoValidFragments { total });
        }
        Ok(count)
    }

    /// Chunk, embed and store every document whose source is not already in
    /// the store, then rebuild the indexes.
    pub fn index(&self, documents: &[Document]) -> RagResult<IndexReport> {
        let _guard = self.index_lock.lock();
        self.index_locked(documents)
    }

    /// Clear the store and index `documents` from scratch.
    pub fn reset(&self, documents: &[Document]) -> RagResult<IndexReport> {
        if documents.is_empty() {
            return Err(RagError::NoDocuments);
        }
        let _guard = self.index_lock.lock();

        tracing::info!("Clearing fragment store");
        self.store.clear()?;
        self.store.flush()?;
        self.retriever.rebuild(Vec::new())?;

        self.index_locked(documents)
    }

    fn index_locked(&self, documents: &[Document]) -> RagResult<IndexReport> {
        if documents.is_empty() {
            return Err(RagError::NoDocuments);
        }

        let fragments_before = self.store.count()?;
        let mut seen: HashSet<String> = self.store.sources()?;
        let new_documents: Vec<&Document> = documents
            .iter()
            .filter(|doc| seen.insert(doc.metadata.source.clone()))
            .collect();
        let documents_skipped = documents.len() - new_documents.len();

        if documents_skipped > 0 {
            tracing::info!("Skipping {documents_skipped} already indexed documents");
        }

        if new_documents.is_empty() {
            tracing::info!("No new documents to index");
            if !self.retriever.is_initialized() {
                self.rebuild_indexes()?;
            }
            return Ok(IndexReport {
                fragments_before,
                fragments_after: fragments_before,
                documents_indexed: 0,
                documents_skipped,
            });
        }

        let splitter = DocumentSplitter::new(
            ChunkingConfig::new(&self.parameters(), &self.options.chunking),
            Some(self.embedder.clone()),
        );
        let (fragments, precomputed): (Vec<Fragment>, Vec<Option<Vec<f32>>>) = new_documents
            .iter()
            .flat_map(|doc| splitter.split_document_with_embeddings(doc))
            .unzip();

        tracing::info!(
            "Created {} fragments from {} new documents",
            fragments.len(),
            new_documents.len()
        );
        if fragments.is_empty() {
            return Err(RagError::NoFragments);
        }

        let embeddings = self.complete_embeddings(&fragments, precomputed)?;
        let stored: Vec<StoredFragment> = fragments
            .into_iter()
            .zip(embeddings)
            .map(|(fragment, embedding)| StoredFragment { fragment, embedding })
            .collect();

        self.store.add(stored)?;
        self.store.flush()?;
        let fragments_after = self.store.count()?;

        self.rebuild_indexes()?;

        tracing::info!(
            "Indexed {} documents ({} fragments in store)",
            new_documents.len(),
            fragments_after
        );
        Ok(IndexReport {
            fragments_before,
            fragments_after,
            documents_indexed: new_documents.len(),
            documents_skipped,
        })
    }

    /// Fill in embeddings that deduplication did not already produce.
    fn complete_embeddings(
        &self,
        fragments: &[Fragment],
        precomputed: Vec<Option<Vec<f32>>>,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let missing: Vec<Fragment> = fragments
            .iter()
            .zip(&precomputed)
            .filter(|(_, embedding)| embedding.is_none())
            .map(|(fragment, _)| fragment.clone())
            .collect();
        tracing::debug!(
            "Reusing {} embeddings from deduplication, embedding {}",
            fragments.len() - missing.len(),
            missing.len()
        );

        let mut fresh = self.embed_fragments(&missing)?.into_iter();
        precomputed
            .into_iter()
            .map(|embedding| match embedding {
                Some(embedding) => Ok(embedding),
                None => fresh.next().context("Embedding missing for fragment"),
            })
            .collect()
    }

    fn embed_fragments(&self, fragments: &[Fragment]) -> anyhow::Result<Vec<Vec<f32>>> {
        let batch_size = self.options.chunking.embedding_batch_size.max(1);
        let mut embeddings = Vec::with_capacity(fragments.len());

        for (i, batch) in fragments.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|f| f.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .with_context(|| format!("Failed to embed fragment batch {i}"))?;
            if vectors.len() != texts.len() {
                bail!(
                    "Embedding count mismatch in batch {i}: expected {}, got {}",
                    texts.len(),
                    vectors.len()
                );
            }
            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }

    /// Validate and apply a partial parameter update, then rebuild.
    ///
    /// Chunking parameters only affect documents indexed afterwards.
    pub fn update_parameters(&self, update: ParameterUpdate) -> RagResult<RagParameters> {
        let _guard = self.index_lock.lock();

        let next = update.apply(&self.parameters())?;
        *self.params.write() = next;
        self.retriever
            .configure(RetrieverSettings::from_parameters(&next, self.options.overfetch_factor));
        tracing::info!("Parameters updated: {next:?}");

        self.rebuild_indexes()?;
        Ok(next)
    }

    // ── Retrieval ───────────────────────────────────────────

    pub fn retrieve(&self, query: &str, top_n: usize) -> RagResult<Vec<RetrievalResult>> {
        self.retriever.retrieve(query, top_n)
    }

    pub fn retrieve_documents(&self, query: &str, top_n: usize) -> RagResult<Vec<Fragment>> {
        self.retriever.retrieve_documents(query, top_n)
    }

    pub fn extract_key_terms(&self, query: &str) -> Vec<String> {
        self.key_terms.extract(query)
    }

    pub fn validate(&self, query: &str) -> QueryValidation {
        self.validator.validate(query)
    }

    // ── Answering ───────────────────────────────────────────

    /// Validate the question, retrieve context and build the prompt.
    pub fn prepare(&self, question: &str) -> RagResult<Preparation> {
        let validation = self.validator.validate(question);
        if !validation.is_valid {
            tracing::info!(
                "Query rejected: {}",
                validation.rejection_reason.as_deref().unwrap_or("invalid")
            );
            return Ok(Preparation::Rejected(validation));
        }

        let results = self.retrieve(question, self.parameters().rerank_top_k)?;
        let prompt = prompt::build_answer_prompt(question, &results);

        Ok(Preparation::Ready(PreparedQuery {
            question: question.to_string(),
            validation,
            results,
            prompt,
        }))
    }

    pub fn generate(&self, prepared: &PreparedQuery) -> RagResult<String> {
        Ok(self
            .llm
            .complete(&prepared.prompt)
            .context("Answer generation failed")?)
    }

    pub fn generate_stream(&self, prepared: &PreparedQuery) -> RagResult<TokenStream> {
        Ok(self
            .llm
            .stream(&prepared.prompt)
            .context("Answer generation failed")?)
    }

    /// Score an answer. `Ok(None)` when evaluation is disabled or no
    /// evaluator is configured.
    pub fn evaluate(
        &self,
        question: &str,
        answer: &str,
        results: &[RetrievalResult],
    ) -> RagResult<Option<AnswerEvaluation>> {
        let Some(evaluator) = self.evaluator.as_ref().filter(|_| self.options.enable_evaluation) else {
            return Ok(None);
        };

        let scores = evaluator
            .evaluate(question, answer, results)
            .context("Answer evaluation failed")?;
        let metrics = self.options.quality_weights.metrics(&scores);

        self.evaluations.lock().push(EvaluationRecord {
            timestamp: Utc::now(),
            question: question.to_string(),
            answer: answer.to_string(),
            num_contexts: results.len(),
            metrics: metrics.clone(),
        });

        Ok(Some(AnswerEvaluation {
            metrics,
            individual_relevancy: scores.individual_relevancy,
        }))
    }

    /// `None` when no evaluator is configured.
    pub fn evaluation_report(&self) -> Option<EvaluationReport> {
        self.evaluator.as_ref()?;
        Some(self.evaluations.lock().report())
    }

    pub fn contexts(&self, prepared: &PreparedQuery, relevance: Option<&[bool]>) -> Vec<ContextInfo> {
        let key_terms = self.extract_key_terms(&prepared.question);
        prompt::build_contexts(&prepared.results, &key_terms, relevance)
    }

    /// Blocking answer. A rejected question is not an error: the answer
    /// carries the rejection reason and `validation_failed` is set.
    pub fn answer(&self, question: &str, options: AnswerOptions) -> RagResult<Answer> {
        let prepared = match self.prepare(question)? {
            Preparation::Rejected(validation) => return Ok(rejected_answer(question, validation)),
            Preparation::Ready(prepared) => prepared,
        };

        let text = self.generate(&prepared)?;

        let evaluation = if options.return_evaluation {
            self.evaluate(question, &text, &prepared.results)
                .unwrap_or_else(|e| {
                    tracing::error!("{e:#}");
                    None
                })
        } else {
            None
        };

        let contexts = options.return_contexts.then(|| {
            let relevance = evaluation.as_ref().map(|e| e.individual_relevancy.as_slice());
            self.contexts(&prepared, relevance)
        });

        Ok(Answer {
            question: question.to_string(),
            answer: text,
            num_contexts: prepared.results.len(),
            contexts,
            evaluation: evaluation.map(|e| e.metrics),
            validation_failed: false,
            validation_reason: None,
        })
    }

    /// Validation, context and token events for one question.
    ///
    /// Returns the full answer once generation completes. Returns `None`
    /// after emitting the reason when validation rejects the question or a
    /// stage fails, and when `emit` returns `false` (consumer gone).
    pub fn stream_answer(
        &self,
        question: &str,
        options: AnswerOptions,
        emit: &mut dyn FnMut(PipelineEvent) -> bool,
    ) -> Option<GeneratedAnswer> {
        let prepared = match self.prepare(question) {
            Ok(Preparation::Ready(prepared)) => prepared,
            Ok(Preparation::Rejected(validation)) => {
                emit(PipelineEvent::Validation { validation });
                return None;
            }
            Err(e) => {
                emit(PipelineEvent::Error {
                    message: e.to_string(),
                });
                return None;
            }
        };

        if !emit(PipelineEvent::Validation {
            validation: prepared.validation.clone(),
        }) {
            return None;
        }

        if options.return_contexts
            && !emit(PipelineEvent::Contexts {
                contexts: self.contexts(&prepared, None),
            })
        {
            return None;
        }

        let tokens = match self.generate_stream(&prepared) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::error!("{e:#}");
                emit(PipelineEvent::Error {
                    message: format!("{e:#}"),
                });
                return None;
            }
        };

        let mut answer = String::new();
        for token in tokens {
            match token {
                Ok(content) if content.is_empty() => {}
                Ok(content) => {
                    answer.push_str(&content);
                    if !emit(PipelineEvent::Token { content }) {
                        return None;
                    }
                }
                Err(e) => {
                    tracing::error!("Token stream failed: {e:#}");
                    emit(PipelineEvent::Error {
                        message: format!("{e:#}"),
                    });
                    return None;
                }
            }
        }

        Some(GeneratedAnswer { prepared, answer })
    }

    /// Full event sequence: validation, contexts, tokens, evaluation, done.
    pub fn answer_events(
        &self,
        question: &str,
        options: AnswerOptions,
        emit: &mut dyn FnMut(PipelineEvent) -> bool,
    ) {
        if let Some(generated) = self.stream_answer(question, options, emit) {
            if options.return_evaluation {
                let outcome = self.evaluate(question, &generated.answer, &generated.prepared.results);
                if let Some(event) = evaluation_event(outcome) {
                    if !emit(event) {
                        return;
                    }
                }
            }
        }
        emit(PipelineEvent::Done);
    }

    pub fn stats(&self) -> RagResult<PipelineStats> {
        Ok(PipelineStats {
            initialized: self.retriever.is_initialized(),
            stored_fragments: self.store.count()?,
            indexed_fragments: self.retriever.indexed_count(),
            documents: self.store.sources()?.len(),
            parameters: self.parameters(),
            reranker_enabled: self.retriever.reranker_enabled(),
            llm_compression: self.options.use_llm_compression,
            llm_validation: self.options.use_llm_validation,
            evaluation_enabled: self.options.enable_evaluation && self.evaluator.is_some(),
        })
    }
}

/// Event for an evaluation outcome; `None` when nothing was evaluated.
pub fn evaluation_event(outcome: RagResult<Option<AnswerEvaluation>>) -> Option<PipelineEvent> {
    match outcome {
        Ok(Some(evaluation)) => Some(PipelineEvent::Evaluation {
            evaluation: evaluation.metrics,
        }),
        Ok(None) => None,
        Err(e) => {
            tracing::error!("{e:#}");
            Some(PipelineEvent::Error {
                message: format!("{e:#}"),
            })
        }
    }
}

fn rejected_answer(question: &str, validation: QueryValidation) -> Answer {
    let reason = validation.rejection_reason.unwrap_or_default();
    Answer {
        question: question.to_string(),
        answer: reason.clone(),
        num_contexts: 0,
        contexts: None,
        evaluation: None,
        validation_failed: true,
        validation_reason: Some(reason),
    }
}
