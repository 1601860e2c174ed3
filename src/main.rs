//! Sourcebook CLI
//!
//! Command-line presentation layer over the RAG pipeline: index documents
//! into a named session, ask questions against it, and inspect its state.
//! Prints JSON on stdout; logs go to stderr.

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use sourcebook::{
    store, DocumentSource, RagPipeline, SessionRecord, Settings,
};

#[derive(Parser)]
#[command(name = "sourcebook")]
#[command(about = "Retrieval-augmented question answering over local documents", long_about = None)]
struct Cli {
    /// Session name (stored under the app data directory)
    #[arg(long, global = true, default_value = "default")]
    session: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load documents, build a fresh index, and save the session
    Index {
        /// Files to index (.txt, .md, .pdf)
        #[arg(required = true)]
        paths: Vec<std::path::PathBuf>,
    },
    /// Add documents to an existing session's index
    Add {
        /// Files to add (.txt, .md, .pdf)
        #[arg(required = true)]
        paths: Vec<std::path::PathBuf>,
    },
    /// Ask a question against a session's index
    Ask {
        question: String,
        /// Override the number of chunks retrieved
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show a session's configuration and index size
    Stats,
    /// Session management commands
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List all saved sessions
    List,
    /// Delete a saved session
    Delete {
        name: String,
    },
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            let error = ErrorOutput {
                error: format!("{:#}", e),
            };
            println!("{}", serde_json::to_string(&error).unwrap_or_default());
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    match cli.command {
        Commands::Index { paths } => handle_index(&cli.session, paths).await,
        Commands::Add { paths } => handle_add(&cli.session, paths).await,
        Commands::Ask { question, top_k } => handle_ask(&cli.session, &question, top_k).await,
        Commands::Stats => handle_stats(&cli.session),
        Commands::Sessions { action } => handle_sessions(action),
    }
}

fn path_sources(paths: Vec<std::path::PathBuf>) -> Vec<DocumentSource> {
    paths.into_iter().map(DocumentSource::Path).collect()
}

async fn handle_index(session: &str, paths: Vec<std::path::PathBuf>) -> anyhow::Result<String> {
    let settings = Settings::load()?;
    let pipeline = RagPipeline::with_gemini(settings.clone());
    pipeline.initialize().await?;

    let outcome = pipeline.load_documents(&path_sources(paths));
    let report = pipeline.create_index(outcome.documents).await?;

    let entries = pipeline
        .index_snapshot()
        .map(|index| index.entries().to_vec())
        .unwrap_or_default();
    let record = SessionRecord::new(session, &settings, entries);
    store::save_session(&store::default_data_dir()?, &record)?;

    Ok(serde_json::to_string_pretty(&json!({
        "session": session,
        "report": report,
        "loadFailures": outcome.failures,
    }))?)
}

async fn handle_add(session: &str, paths: Vec<std::path::PathBuf>) -> anyhow::Result<String> {
    let settings = Settings::load()?;
    let data_dir = store::default_data_dir()?;
    let mut record = store::load_session(&data_dir, session)?;

    let pipeline = RagPipeline::with_gemini(settings);
    pipeline.initialize().await?;
    pipeline.restore_index(std::mem::take(&mut record.entries))?;

    let outcome = pipeline.load_documents(&path_sources(paths));
    let report = pipeline.add_documents(outcome.documents).await?;

    record.entries = pipeline
        .index_snapshot()
        .map(|index| index.entries().to_vec())
        .unwrap_or_default();
    record.updated = Utc::now();
    store::save_session(&data_dir, &record)?;

    Ok(serde_json::to_string_pretty(&json!({
        "session": session,
        "report": report,
        "loadFailures": outcome.failures,
    }))?)
}

async fn handle_ask(
    session: &str,
    question: &str,
    top_k: Option<usize>,
) -> anyhow::Result<String> {
    let mut settings = Settings::load()?;
    if let Some(k) = top_k {
        settings.retrieval_top_k = k;
        settings.validate()?;
    }

    let record = store::load_session(&store::default_data_dir()?, session)?;
    let pipeline = RagPipeline::with_gemini(settings);
    pipeline.initialize().await?;
    pipeline.restore_index(record.entries)?;

    let result = pipeline.query(question).await?;
    Ok(serde_json::to_string_pretty(&result)?)
}

fn handle_stats(session: &str) -> anyhow::Result<String> {
    let record = store::load_session(&store::default_data_dir()?, session)?;
    Ok(serde_json::to_string_pretty(&json!({
        "session": record.name,
        "documents": record.document_count(),
        "chunks": record.entries.len(),
        "modelName": record.model_name,
        "embeddingModel": record.embedding_model,
        "chunkSize": record.chunk_size,
        "chunkOverlap": record.chunk_overlap,
        "updated": record.updated.to_rfc3339(),
    }))?)
}

fn handle_sessions(action: SessionsAction) -> anyhow::Result<String> {
    let data_dir = store::default_data_dir()?;
    match action {
        SessionsAction::List => {
            let sessions = store::list_sessions(&data_dir)?;
            Ok(serde_json::to_string_pretty(&sessions)?)
        }
        SessionsAction::Delete { name } => {
            store::delete_session(&data_dir, &name)?;
            Ok(json!({ "deleted": name }).to_string())
        }
    }
}
