//! `smartdoc`: upload a document, then ask questions about it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use smartdoc_rag::gemini::{GeminiClient, GeminiEmbeddingProvider, GeminiModelLoader};
use smartdoc_rag::{
    Answer, Document, DocumentKind, Session, SessionStatus, SmartDocConfig, UploadReport,
    VectorIndex, purge_storage,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Document question answering over a local vector index.
#[derive(Parser, Debug)]
#[command(name = "smartdoc", version, about = "Ask questions about your documents")]
struct Cli {
    /// Directory holding the vector index (overrides VECTOR_DB_PATH)
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,

    /// Directory where uploaded files are staged (overrides UPLOAD_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    upload_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a .txt, .csv or .pdf file
    Upload {
        file: PathBuf,
    },
    /// Answer a question from the indexed document
    Ask {
        question: String,
        /// Number of chunks to ground the answer on
        #[arg(short, long)]
        k: Option<usize>,
        /// Print the full answer as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the chunks a question would be answered from, as JSON
    Retrieve {
        question: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Delete the index and all staged uploads
    Reset,
    /// Show whether a document is loaded
    Status,
    /// List Gemini models that can answer questions
    Models {
        /// Include every model, not only those supporting generateContent
        #[arg(long)]
        all: bool,
    },
    /// Interactive question loop
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Upload { file } => {
            let session = build_session(config)?;
            let report = upload_file(&session, &file).await?;
            print_report(&report);
        }
        Command::Ask { question, k, json } => {
            let session = build_session(config)?;
            let k = k.unwrap_or(session.config().default_k);
            let answer = session.ask(&question, k).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Command::Retrieve { question, k } => {
            let session = build_session(config)?;
            let k = k.unwrap_or(session.config().default_k);
            let contexts: Vec<_> = session
                .retrieve_contexts(&question, k)
                .await
                .into_iter()
                .map(|record| {
                    json!({
                        "text": record.text,
                        "source": record.metadata.source_label(),
                        "score": record.metadata.score,
                    })
                })
                .collect();
            let output = json!({ "question": question, "contexts": contexts });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Reset => {
            purge_storage(&config).await.context("reset failed")?;
            println!("Index and uploads cleared.");
        }
        Command::Status => {
            let summary = VectorIndex::inspect(&config.persist_location)
                .await
                .context("failed to read the index")?;
            let records = summary.map_or(0, |summary| summary.count);
            let status =
                if records > 0 { SessionStatus::Ready } else { SessionStatus::NoDocument };
            println!("{}", json!({ "status": status, "records": records }));
        }
        Command::Models { all } => list_models(all).await?,
        Command::Chat => chat(&build_session(config)?).await?,
    }

    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<SmartDocConfig> {
    let mut config = SmartDocConfig::from_env().context("invalid configuration")?;
    if let Some(store) = &cli.store {
        config.persist_location = store.clone();
    }
    if let Some(upload_dir) = &cli.upload_dir {
        config.upload_dir = upload_dir.clone();
    }
    debug!(?config, "resolved configuration");
    Ok(config)
}

fn build_session(config: SmartDocConfig) -> Result<Session> {
    let client = GeminiClient::from_env()?;
    let embedder = GeminiEmbeddingProvider::new(client.clone(), config.embedding_model.clone());

    Ok(Session::builder()
        .config(config)
        .embedding_provider(Arc::new(embedder))
        .model_loader(Arc::new(GeminiModelLoader::new(client)))
        .build()?)
}

async fn list_models(all: bool) -> Result<()> {
    let models = GeminiClient::from_env()?.list_models().await?;
    for model in models.iter().filter(|model| all || model.supports_generation()) {
        let name = model.name.strip_prefix("models/").unwrap_or(&model.name);
        println!("{name:<40} {}", model.display_name);
    }
    Ok(())
}

async fn upload_file(session: &Session, path: &Path) -> Result<UploadReport> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| {
        anyhow!("unsupported file type: {} (expected .txt, .csv or .pdf)", path.display())
    })?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("upload.{kind}"));

    Ok(session.upload_document(Document::new(name, kind, bytes)).await?)
}

fn print_report(report: &UploadReport) {
    let source = report.source.as_deref().unwrap_or("document");
    println!(
        "Indexed {source}: {} chunks added, {} records total.",
        report.chunks_added, report.total_records
    );
    if report.recreated {
        println!("The previous index was incompatible and has been rebuilt.");
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if answer.grounded {
        println!("\nConfidence: {:.2}", answer.confidence);
    }
}

const CHAT_HELP: &str = "Commands: :upload <file>  :reset  :status  :help  :quit";

async fn chat(session: &Session) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("SmartDoc chat. Ask a question, or {CHAT_HELP}");

    loop {
        let line = match editor.readline("smartdoc> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        editor.add_history_entry(line)?;

        match line.split_once(char::is_whitespace).unwrap_or((line, "")) {
            (":quit" | ":exit", _) => break,
            (":help", _) => println!("{CHAT_HELP}"),
            (":status", _) => {
                let status = session.status().await;
                println!("{status:?} ({} records)", session.document_count().await);
            }
            (":reset", _) => match session.reset().await {
                Ok(()) => println!("Index and uploads cleared."),
                Err(e) => println!("Reset failed: {e}"),
            },
            (":upload", path) if !path.trim().is_empty() => {
                match upload_file(session, Path::new(path.trim())).await {
                    Ok(report) => print_report(&report),
                    Err(e) => println!("Upload failed: {e:#}"),
                }
            }
            (command, _) if command.starts_with(':') => println!("Unknown command. {CHAT_HELP}"),
            _ => print_answer(&session.ask_default(line).await),
        }
    }

    Ok(())
}
