use std::io::Write;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use regdoc_rag::config::{Config, ParameterUpdate};
use regdoc_rag::models::{AnswerOptions, PipelineEvent};
use regdoc_rag::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "regdoc-rag", about = "Question answering over university regulatory documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index documents that are not in the store yet
    Index,
    /// Clear the store and index the documents directory from scratch
    Reset,
    /// Answer a question
    Ask {
        question: String,
        /// Print tokens as they are generated
        #[arg(long)]
        stream: bool,
        /// Include the retrieved contexts
        #[arg(long)]
        contexts: bool,
        /// Score the answer when an evaluator is configured
        #[arg(long)]
        evaluate: bool,
    },
    /// Show reranked fragments for a query
    Search {
        query: String,
        #[arg(long, default_value_t = 3)]
        top_n: usize,
    },
    /// Show the query words the cross-encoder weighs most
    KeyTerms { query: String },
    /// Update retrieval parameters and rebuild the indexes
    Tune {
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        chunk_overlap: Option<usize>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        rerank_top_k: Option<usize>,
        #[arg(long)]
        bm25_weight: Option<f32>,
        #[arg(long)]
        vector_weight: Option<f32>,
    },
    /// Print store and index statistics
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Documents directory: {}", config.documents_dir.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);

    // Blocking model clients must be built before the runtime starts.
    let state = AppState::new(config.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.worker_threads.max(1))
        .build()?;
    let outcome = runtime.block_on(run(&state, cli.command));
    drop(runtime);

    state.shutdown()?;
    outcome
}

async fn run(state: &AppState, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Index => print_json(&state.index_documents().await?),
        Command::Reset => print_json(&state.reset().await?),
        Command::Ask {
            question,
            stream,
            contexts,
            evaluate,
        } => {
            state.initialize().await?;
            if evaluate && state.evaluation_report().is_none() {
                tracing::warn!("No answer evaluator configured, --evaluate is ignored");
            }
            let options = AnswerOptions {
                return_contexts: contexts,
                return_evaluation: evaluate,
            };
            if stream {
                stream_answer(state, question, options).await
            } else {
                print_json(&state.answer(question, options).await?)
            }
        }
        Command::Search { query, top_n } => {
            state.initialize().await?;
            print_json(&state.search(query, top_n).await?)
        }
        Command::KeyTerms { query } => print_json(&state.key_terms(query).await?),
        Command::Tune {
            chunk_size,
            chunk_overlap,
            top_k,
            rerank_top_k,
            bm25_weight,
            vector_weight,
        } => {
            state.initialize().await?;
            let update = ParameterUpdate {
                chunk_size,
                chunk_overlap,
                top_k,
                rerank_top_k,
                bm25_weight,
                vector_weight,
            };
            if update.is_empty() {
                anyhow::bail!("No parameters given");
            }
            print_json(&state.update_parameters(update).await?)
        }
        Command::Stats => {
            state.initialize().await?;
            print_json(&state.stats().await?)?;
            if let Some(report) = state.evaluation_report() {
                print_json(&report)?;
            }
            Ok(())
        }
    }
}

/// Tokens go to stdout as they arrive; every other event is printed as JSON.
async fn stream_answer(state: &AppState, question: String, options: AnswerOptions) -> anyhow::Result<()> {
    let mut events = Box::pin(state.answer_stream(question, options));
    let mut stdout = std::io::stdout();
    let mut in_answer = false;

    while let Some(event) = events.next().await {
        match event {
            PipelineEvent::Token { content } => {
                in_answer = true;
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            PipelineEvent::Done => {
                if in_answer {
                    writeln!(stdout)?;
                }
            }
            other => {
                if in_answer {
                    writeln!(stdout)?;
                    in_answer = false;
                }
                writeln!(stdout, "{}", serde_json::to_string(&other)?)?;
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
