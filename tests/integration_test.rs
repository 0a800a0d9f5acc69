//! Integration tests for the retrieval and answering pipeline.
//!
//! These tests run the full index → retrieve → answer flow against
//! deterministic in-process models, so no LLM or reranker server is needed.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;

use regdoc_rag::config::{Config, ParameterUpdate, RagParameters};
use regdoc_rag::error::RagError;
use regdoc_rag::llm::{CrossEncoder, Embedder, LanguageModel, TokenStream};
use regdoc_rag::models::{AnswerOptions, Document, PipelineEvent, RetrievalResult};
use regdoc_rag::pipeline::evaluation::{AnswerEvaluator, QualityScores};
use regdoc_rag::pipeline::{PipelineBackends, PipelineOptions, RagPipeline};
use regdoc_rag::state::AppState;
use regdoc_rag::store::{FragmentStore, InMemoryFragmentStore, JsonFragmentStore};

const DIMENSIONS: usize = 64;
const ANSWER: &str = "Академічна стипендія призначається за результатами семестрового контролю.";

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(String::from)
        .collect()
}

/// Bag-of-words vectors hashed into a fixed number of buckets.
struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIMENSIONS];
                for word in words(text) {
                    let mut hasher = DefaultHasher::new();
                    word.hash(&mut hasher);
                    vector[(hasher.finish() as usize) % DIMENSIONS] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Scores a text by how many query words it contains.
struct OverlapCrossEncoder;

impl CrossEncoder for OverlapCrossEncoder {
    fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>> {
        let query_words = words(query);
        Ok(texts
            .iter()
            .map(|text| {
                let text_words = words(text);
                query_words
                    .iter()
                    .filter(|w| text_words.contains(w))
                    .count() as f32
            })
            .collect())
    }
}

/// Returns a fixed answer, streamed word by word.
struct ScriptedModel;

impl LanguageModel for ScriptedModel {
    fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(ANSWER.to_string())
    }

    fn stream(&self, _prompt: &str) -> Result<TokenStream> {
        let tokens: Vec<Result<String>> = ANSWER
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(Box::new(tokens.into_iter()))
    }
}

struct FixedEvaluator;

impl AnswerEvaluator for FixedEvaluator {
    fn evaluate(&self, _question: &str, _answer: &str, contexts: &[RetrievalResult]) -> Result<QualityScores> {
        Ok(QualityScores {
            faithfulness: 1.0,
            answer_relevancy: 1.0,
            context_relevancy: 1.0,
            mrr: 1.0,
            map: 1.0,
            individual_relevancy: vec![true; contexts.len()],
        })
    }
}

fn scholarship_doc() -> Document {
    Document::new(
        "stypendii.txt",
        "Стаття 1. Призначення стипендій\n\n\
         Академічна стипендія призначається студентам за результатами семестрового контролю. \
         Рейтинг формується деканатом факультету.\n\n\
         Стаття 2. Розмір стипендії\n\n\
         Розмір академічної стипендії встановлюється Кабінетом Міністрів України. \
         Підвищена стипендія призначається відмінникам навчання.",
    )
}

fn exams_doc() -> Document {
    Document::new(
        "ekzameny.txt",
        "Стаття 1. Перескладання іспитів\n\n\
         Студент має право перескласти іспит не більше двох разів. \
         Друге перескладання приймає комісія, створена деканатом.\n\n\
         Стаття 2. Апеляція\n\n\
         Студент може подати апеляцію щодо оцінки протягом трьох робочих днів \
         після оголошення результатів.",
    )
}

fn pipeline_with(store: Arc<dyn FragmentStore>) -> RagPipeline {
    RagPipeline::new(
        RagParameters::default(),
        PipelineOptions::default(),
        PipelineBackends {
            embedder: Arc::new(HashEmbedder),
            llm: Arc::new(ScriptedModel),
            cross_encoder: Some(Arc::new(OverlapCrossEncoder)),
            store,
            evaluator: Some(Arc::new(FixedEvaluator)),
        },
    )
}

fn pipeline() -> RagPipeline {
    pipeline_with(Arc::new(InMemoryFragmentStore::new()))
}

fn indexed_pipeline() -> RagPipeline {
    let p = pipeline();
    p.index(&[scholarship_doc(), exams_doc()]).unwrap();
    p
}

fn collect_events(p: &RagPipeline, question: &str, options: AnswerOptions) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    p.answer_events(question, options, &mut |event| {
        events.push(event);
        true
    });
    events
}

#[test]
fn test_retrieve_before_any_build_is_not_initialized() {
    let p = pipeline();
    assert!(matches!(
        p.retrieve("стипендія", 3),
        Err(RagError::NotInitialized)
    ));
}

#[test]
fn test_empty_store_retrieves_nothing() {
    let p = pipeline();
    assert_eq!(p.rebuild_indexes().unwrap(), 0);
    assert!(p.is_initialized());
    assert!(p.retrieve("будь-який запит", 3).unwrap().is_empty());
}

#[test]
fn test_index_and_retrieve() {
    let p = indexed_pipeline();
    let results = p.retrieve("академічна стипендія розмір", 3).unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 3);
    assert_eq!(results[0].fragment.source(), "stypendii.txt");
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
    }
    for pair in results.windows(2) {
        assert!(pair[0].relevance_score >= pair[1].relevance_score);
    }
}

#[test]
fn test_fragments_carry_article_metadata() {
    let p = indexed_pipeline();
    let stored = p.store().all().unwrap();
    assert!(!stored.is_empty());
    for s in &stored {
        assert!(s.fragment.metadata.section_number.is_some());
        assert!(s.fragment.text.chars().count() >= 50);
        assert!(!s.embedding.is_empty());
    }
}

#[test]
fn test_reindexing_same_documents_is_a_no_op() {
    let p = indexed_pipeline();
    let before = p.store().count().unwrap();

    let report = p.index(&[scholarship_doc(), exams_doc()]).unwrap();
    assert_eq!(report.documents_indexed, 0);
    assert_eq!(report.documents_skipped, 2);
    assert_eq!(report.fragments_before, before);
    assert_eq!(report.fragments_after, before);
    assert_eq!(p.store().count().unwrap(), before);
}

#[test]
fn test_index_without_documents_fails() {
    let p = pipeline();
    assert!(matches!(p.index(&[]), Err(RagError::NoDocuments)));
    assert!(matches!(p.reset(&[]), Err(RagError::NoDocuments)));
}

#[test]
fn test_reset_replaces_store_contents() {
    let p = pipeline();
    p.index(&[scholarship_doc()]).unwrap();

    let report = p.reset(&[exams_doc()]).unwrap();
    assert_eq!(report.fragments_before, 0);
    assert_eq!(report.documents_indexed, 1);

    let sources = p.store().sources().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources.contains("ekzameny.txt"));

    let results = p.retrieve("академічна стипендія", 3).unwrap();
    assert!(results.iter().all(|r| r.fragment.source() == "ekzameny.txt"));
}

#[test]
fn test_unethical_question_is_rejected_before_retrieval() {
    // Never indexed: reaching retrieval would fail with NotInitialized.
    let p = pipeline();
    let answer = p
        .answer("Як студенту вступити до політичної партії?", AnswerOptions::default())
        .unwrap();
    assert!(answer.validation_failed);
    assert_eq!(answer.num_contexts, 0);
    assert!(answer.validation_reason.is_some());

    let events = collect_events(&p, "Як студенту вступити до політичної партії?", AnswerOptions::default());
    assert_eq!(events.len(), 2);
    match &events[0] {
        PipelineEvent::Validation { validation } => {
            assert!(!validation.is_valid);
            assert!(!validation.is_ethical);
        }
        other => panic!("expected validation event, got {other:?}"),
    }
    assert!(matches!(events[1], PipelineEvent::Done));
}

#[test]
fn test_blocking_answer_with_contexts_and_evaluation() {
    let p = indexed_pipeline();
    let options = AnswerOptions {
        return_contexts: true,
        return_evaluation: true,
    };
    let answer = p.answer("Як призначається академічна стипендія?", options).unwrap();

    assert!(!answer.validation_failed);
    assert_eq!(answer.answer, ANSWER);
    assert!(answer.num_contexts > 0 && answer.num_contexts <= 3);

    let contexts = answer.contexts.unwrap();
    assert_eq!(contexts.len(), answer.num_contexts);
    assert_eq!(contexts[0].rank, 1);
    assert!(contexts.iter().all(|c| c.is_relevant == Some(true)));
    assert!(!contexts[0].key_terms.is_empty());

    let evaluation = answer.evaluation.unwrap();
    assert!((evaluation.overall_score - 1.0).abs() < 1e-6);
    assert_eq!(p.evaluation_report().unwrap().total_evaluations, 1);
}

#[test]
fn test_stream_event_order() {
    let p = indexed_pipeline();
    let options = AnswerOptions {
        return_contexts: true,
        return_evaluation: true,
    };
    let events = collect_events(&p, "Як призначається академічна стипендія?", options);

    assert!(matches!(events.first(), Some(PipelineEvent::Validation { .. })));
    assert!(matches!(events.get(1), Some(PipelineEvent::Contexts { .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::Done)));
    assert!(matches!(
        events[events.len() - 2],
        PipelineEvent::Evaluation { .. }
    ));

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Token { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, ANSWER);
}

#[test]
fn test_stream_without_contexts_skips_contexts_event() {
    let p = indexed_pipeline();
    let events = collect_events(&p, "Який розмір академічної стипендії?", AnswerOptions::default());

    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Contexts { .. } | PipelineEvent::Evaluation { .. })));
    assert!(matches!(events[1], PipelineEvent::Token { .. }));
}

#[test]
fn test_invalid_parameter_update_keeps_parameters() {
    let p = indexed_pipeline();
    let update = ParameterUpdate {
        bm25_weight: Some(1.5),
        ..Default::default()
    };
    assert!(matches!(
        p.update_parameters(update),
        Err(RagError::InvalidParameter { name: "bm25_weight", .. })
    ));
    assert_eq!(p.parameters(), RagParameters::default());
}

#[test]
fn test_sparse_only_weights() {
    let p = indexed_pipeline();
    let params = p
        .update_parameters(ParameterUpdate {
            bm25_weight: Some(1.0),
            vector_weight: Some(0.0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(params.vector_weight, 0.0);

    let results = p.retrieve("апеляцію щодо оцінки", 3).unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].fragment.source(), "ekzameny.txt");
}

#[test]
fn test_zero_weights_rank_by_cross_encoder() {
    let p = indexed_pipeline();
    p.update_parameters(ParameterUpdate {
        bm25_weight: Some(0.0),
        vector_weight: Some(0.0),
        ..Default::default()
    })
    .unwrap();

    let results = p.retrieve("апеляцію щодо оцінки", 3).unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].fragment.source(), "ekzameny.txt");
}

#[test]
fn test_json_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fragments.json");

    let count = {
        let p = pipeline_with(Arc::new(JsonFragmentStore::open_or_create(&path).unwrap()));
        p.index(&[scholarship_doc(), exams_doc()]).unwrap();
        p.store().count().unwrap()
    };
    assert!(count > 0);

    let reopened = pipeline_with(Arc::new(JsonFragmentStore::open_or_create(&path).unwrap()));
    assert_eq!(reopened.rebuild_indexes().unwrap(), count);

    let report = reopened.index(&[scholarship_doc()]).unwrap();
    assert_eq!(report.documents_skipped, 1);
    assert_eq!(report.fragments_after, count);
}

#[test]
fn test_stats_reflect_index() {
    let p = indexed_pipeline();
    let stats = p.stats().unwrap();
    assert!(stats.initialized);
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.stored_fragments, stats.indexed_fragments);
    assert!(stats.reranker_enabled);
    assert!(stats.evaluation_enabled);
}

fn app_state(documents_dir: &std::path::Path, data_dir: &std::path::Path) -> AppState {
    let config = Config {
        documents_dir: documents_dir.to_path_buf(),
        data_dir: data_dir.to_path_buf(),
        ..Config::default()
    };
    AppState::with_pipeline(config, Arc::new(pipeline()))
}

#[test]
fn test_http_app_state_carries_configured_evaluator() {
    let data = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: data.path().to_path_buf(),
        ..Config::default()
    };

    let plain = AppState::new(config.clone()).unwrap();
    assert!(plain.evaluation_report().is_none());

    let evaluated = AppState::with_evaluator(config, Some(Arc::new(FixedEvaluator))).unwrap();
    let report = evaluated.evaluation_report().unwrap();
    assert_eq!(report.total_evaluations, 0);
}

fn write_documents(dir: &std::path::Path) {
    for doc in [scholarship_doc(), exams_doc()] {
        std::fs::write(dir.join(&doc.metadata.source), &doc.text).unwrap();
    }
}

#[tokio::test]
async fn test_app_state_initializes_from_documents_dir() {
    let docs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_documents(docs.path());

    let state = app_state(docs.path(), data.path());
    state.initialize().await.unwrap();

    let stats = state.stats().await.unwrap();
    assert_eq!(stats.documents, 2);

    let results = state.search("перескладання іспиту".to_string(), 2).await.unwrap();
    assert!(!results.is_empty());
}

#[tokio::test]
async fn test_app_state_answer_stream() {
    let docs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_documents(docs.path());

    let state = app_state(docs.path(), data.path());
    state.initialize().await.unwrap();

    let options = AnswerOptions {
        return_contexts: false,
        return_evaluation: true,
    };
    let events: Vec<PipelineEvent> = state
        .answer_stream("Як призначається академічна стипендія?".to_string(), options)
        .collect()
        .await;

    assert!(matches!(events.first(), Some(PipelineEvent::Validation { .. })));
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::Token { .. })));
    assert!(matches!(events[events.len() - 2], PipelineEvent::Evaluation { .. }));
    assert!(matches!(events.last(), Some(PipelineEvent::Done)));
}

#[tokio::test]
async fn test_app_state_rejects_off_topic_question() {
    let docs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    write_documents(docs.path());

    let state = app_state(docs.path(), data.path());
    state.initialize().await.unwrap();

    let answer = state
        .answer("Яка сьогодні погода у Львові?".to_string(), AnswerOptions::default())
        .await
        .unwrap();
    assert!(answer.validation_failed);

    let events: Vec<PipelineEvent> = state
        .answer_stream("Яка сьогодні погода у Львові?".to_string(), AnswerOptions::default())
        .collect()
        .await;
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], PipelineEvent::Done));
}

#[tokio::test]
async fn test_app_state_initialize_with_empty_directory() {
    let docs = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    let state = app_state(docs.path(), data.path());
    state.initialize().await.unwrap();
    assert!(state
        .search("стипендія".to_string(), 3)
        .await
        .unwrap()
        .is_empty());
}
