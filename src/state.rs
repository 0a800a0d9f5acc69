use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::config::{Config, ParameterUpdate, RagParameters};
use crate::documents::load_documents;
use crate::error::{RagError, RagResult};
use crate::llm::chat::HttpChatModel;
use crate::llm::cross_encoder::HttpCrossEncoder;
use crate::llm::embeddings::HttpEmbedder;
use crate::llm::CrossEncoder;
use crate::models::{Answer, AnswerOptions, IndexReport, PipelineEvent, RetrievalResult};
use crate::pipeline::evaluation::{AnswerEvaluator, EvaluationReport};
use crate::pipeline::{evaluation_event, PipelineBackends, PipelineOptions, PipelineStats, RagPipeline};
use crate::store::JsonFragmentStore;

/// Events buffered between the generating worker and the stream consumer.
const EVENT_BUFFER: usize = 64;

/// Shared application state.
///
/// Cheap to clone. Every pipeline call runs on tokio's blocking pool, whose
/// size the binary fixes when it builds the runtime.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<RagPipeline>,
}

impl AppState {
    /// Build the HTTP-backed pipeline. Must run outside an async context,
    /// since the model clients are blocking.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_evaluator(config, None)
    }

    /// Like [`AppState::new`], with an answer evaluator behind
    /// `return_evaluation` and the evaluation report.
    pub fn with_evaluator(
        config: Config,
        evaluator: Option<Arc<dyn AnswerEvaluator>>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let embedder = Arc::new(HttpEmbedder::new(&config.llm)?);
        let llm = Arc::new(HttpChatModel::new(&config.llm)?);
        let cross_encoder: Option<Arc<dyn CrossEncoder>> = match HttpCrossEncoder::new(&config.reranker) {
            Ok(model) => Some(Arc::new(model)),
            Err(e) => {
                tracing::warn!("Cross-encoder unavailable: {e:#}");
                None
            }
        };
        let store = Arc::new(JsonFragmentStore::open_or_create(&config.store_path())?);

        let pipeline = RagPipeline::new(
            config.rag,
            PipelineOptions::from_config(&config),
            PipelineBackends {
                embedder,
                llm,
                cross_encoder,
                store,
                evaluator,
            },
        );

        Ok(Self::with_pipeline(config, Arc::new(pipeline)))
    }

    pub fn with_pipeline(config: Config, pipeline: Arc<RagPipeline>) -> Self {
        Self { config, pipeline }
    }

    async fn run_blocking<T, F>(&self, f: F) -> RagResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RagPipeline) -> RagResult<T> + Send + 'static,
    {
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || f(&pipeline))
            .await
            .map_err(|e| RagError::WorkerPool(e.to_string()))?
    }

    /// Build indexes from the store; index the documents directory when
    /// the store is empty.
    pub async fn initialize(&self) -> RagResult<()> {
        let documents_dir = self.config.documents_dir.clone();
        self.run_blocking(move |pipeline| {
            let count = pipeline.rebuild_indexes()?;
            if count > 0 {
                tracing::info!("Loaded {count} fragments from the store");
                return Ok(());
            }

            tracing::info!("Store is empty, indexing {}", documents_dir.display());
            match pipeline.index(&load_documents(&documents_dir)) {
                Ok(report) => {
                    tracing::info!("Initial indexing added {} fragments", report.fragments_added());
                    Ok(())
                }
                Err(RagError::NoDocuments) => {
                    tracing::warn!("No documents found in {}", documents_dir.display());
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    pub async fn answer(&self, question: String, options: AnswerOptions) -> RagResult<Answer> {
        self.run_blocking(move |pipeline| pipeline.answer(&question, options))
            .await
    }

    /// Answer as a stream of events ending in `Done`.
    ///
    /// Evaluation runs as its own blocking task after the last token.
    pub fn answer_stream(
        &self,
        question: String,
        options: AnswerOptions,
    ) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel::<PipelineEvent>(EVENT_BUFFER);
        let pipeline = self.pipeline.clone();

        tokio::spawn(async move {
            let generation = {
                let pipeline = pipeline.clone();
                let tx = tx.clone();
                tokio::task::spawn_blocking(move || {
                    pipeline.stream_answer(&question, options, &mut |event| tx.blocking_send(event).is_ok())
                })
                .await
            };

            let generated = match generation {
                Ok(generated) => generated,
                Err(e) => {
                    let _ = tx
                        .send(PipelineEvent::Error {
                            message: RagError::WorkerPool(e.to_string()).to_string(),
                        })
                        .await;
                    None
                }
            };

            if let Some(generated) = generated.filter(|_| options.return_evaluation) {
                let outcome = tokio::task::spawn_blocking(move || {
                    pipeline.evaluate(
                        &generated.prepared.question,
                        &generated.answer,
                        &generated.prepared.results,
                    )
                })
                .await
                .unwrap_or_else(|e| Err(RagError::WorkerPool(e.to_string())));

                if let Some(event) = evaluation_event(outcome) {
                    let _ = tx.send(event).await;
                }
            }

            let _ = tx.send(PipelineEvent::Done).await;
        });

        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    pub async fn search(&self, query: String, top_n: usize) -> RagResult<Vec<RetrievalResult>> {
        self.run_blocking(move |pipeline| pipeline.retrieve(&query, top_n))
            .await
    }

    pub async fn key_terms(&self, query: String) -> RagResult<Vec<String>> {
        self.run_blocking(move |pipeline| Ok(pipeline.extract_key_terms(&query)))
            .await
    }

    /// Index new documents from the documents directory.
    pub async fn index_documents(&self) -> RagResult<IndexReport> {
        let documents_dir = self.config.documents_dir.clone();
        self.run_blocking(move |pipeline| pipeline.index(&load_documents(&documents_dir)))
            .await
    }

    /// Drop the store and re-index the documents directory.
    pub async fn reset(&self) -> RagResult<IndexReport> {
        let documents_dir = self.config.documents_dir.clone();
        self.run_blocking(move |pipeline| pipeline.reset(&load_documents(&documents_dir)))
            .await
    }

    pub async fn update_parameters(&self, update: ParameterUpdate) -> RagResult<RagParameters> {
        self.run_blocking(move |pipeline| pipeline.update_parameters(update))
            .await
    }

    pub async fn stats(&self) -> RagResult<PipelineStats> {
        self.run_blocking(|pipeline| pipeline.stats()).await
    }

    pub fn evaluation_report(&self) -> Option<EvaluationReport> {
        self.pipeline.evaluation_report()
    }

    /// Flush the store. Call once, after the last request.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.pipeline.store().flush()?;
        tracing::info!("Fragment store flushed");
        Ok(())
    }
}
