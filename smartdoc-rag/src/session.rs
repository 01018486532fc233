//! The session controller.
//!
//! A [`Session`] owns the single active [`VectorIndex`] and generative model
//! and orchestrates the three user-facing operations:
//!
//! - **upload**: chunk → embed → insert, creating the index on first use
//! - **ask**: retrieve → compose, never failing
//! - **reset**: release and delete everything persisted
//!
//! State lives behind a `tokio::sync::RwLock`. Upload and reset hold the write
//! lock for their whole duration. Ask takes the write lock only while lazily
//! loading the index or model and then downgrades, so asks run concurrently
//! with each other but never overlap an upload or reset.
//!
//! # Example
//!
//! ```rust,ignore
//! use smartdoc_rag::{Session, SmartDocConfig};
//!
//! let session = Session::builder()
//!     .config(SmartDocConfig::from_env()?)
//!     .embedding_provider(embedder)
//!     .model_loader(loader)
//!     .build()?;
//!
//! session.upload("The sky is blue.", Some("notes.txt")).await?;
//! let answer = session.ask_default("What color is the sky?").await;
//! println!("{}", answer.text);
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::answer::{Answer, AnswerComposer};
use crate::chunking::RecursiveChunker;
use crate::config::SmartDocConfig;
use crate::document::{Document, EmbeddingRecord};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, ResetError, Result, UploadError};
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::index::VectorIndex;
use crate::model::{GenerativeModel, ModelLoader, StaticModelLoader};
use crate::retriever::Retriever;

/// Whether a session has anything to answer from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No index, or an index without records.
    NoDocument,
    /// An index with at least one record is available.
    Ready,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    /// Label the new records were stored under.
    pub source: Option<String>,
    /// Chunks added by this upload.
    pub chunks_added: usize,
    /// Records in the index after the upload.
    pub total_records: usize,
    /// The index was destroyed and rebuilt because its persisted state was
    /// unusable or its dimensionality no longer matched the embedder.
    pub recreated: bool,
}

struct SessionState {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Option<VectorIndex>,
    model: Option<Arc<dyn GenerativeModel>>,
}

/// Single-tenant document QA session.
pub struct Session {
    config: SmartDocConfig,
    chunker: RecursiveChunker,
    composer: AnswerComposer,
    model_loader: Arc<dyn ModelLoader>,
    extractor: Arc<dyn TextExtractor>,
    state: RwLock<SessionState>,
}

impl Session {
    /// Create a new [`SessionBuilder`].
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &SmartDocConfig {
        &self.config
    }

    /// Chunk, embed and index `raw_text`, adding to any existing corpus.
    ///
    /// `source` labels the new records, typically with the uploaded file name.
    ///
    /// If the persisted snapshot is corrupt, or rejects the new embeddings
    /// because their dimensionality changed, the index is destroyed and
    /// recreated and the insert retried once. A persist location holding
    /// files that do not belong to an index is reported as
    /// [`UploadError::IndexFailure`] and left untouched.
    ///
    /// # Errors
    ///
    /// See [`UploadError`]. Failures before the index is touched leave the
    /// session unchanged. If the retry after a dimensionality change also
    /// fails, the old corpus is already gone: the session is left with no
    /// document rather than its previous state.
    pub async fn upload(
        &self,
        raw_text: &str,
        source: Option<&str>,
    ) -> std::result::Result<UploadReport, UploadError> {
        if raw_text.trim().is_empty() {
            warn!(source, "rejected upload with no text");
            return Err(UploadError::EmptyText);
        }

        let chunks = self.chunker.chunk(raw_text).map_err(|e| {
            error!(source, error = %e, "chunking failed");
            UploadError::ChunkingFailure(e)
        })?;
        debug!(source, chunk_count = chunks.len(), "chunked document");

        let mut state = self.state.write().await;
        let embedder = Arc::clone(&state.embedder);
        let location = self.config.persist_location.as_path();

        let was_active = state.index.is_some();
        let (index, mut recreated) = match state.index.take() {
            Some(index) => (index, false),
            None => self.open_for_upload(location, Arc::clone(&embedder)).await?,
        };
        let mut index = index.with_scores(self.config.attach_scores);

        let chunks_added = match index.insert(&chunks, source).await {
            Ok(added) => added,
            Err(RagError::DimensionMismatch { expected, actual }) => {
                warn!(
                    location = %location.display(),
                    expected,
                    actual,
                    "embedding dimensions changed, recreating index"
                );
                VectorIndex::destroy(Some(index), location, self.config.removal)
                    .await
                    .map_err(UploadError::IndexFailure)?;
                index = VectorIndex::create(location, embedder)
                    .await
                    .map_err(UploadError::IndexFailure)?
                    .with_scores(self.config.attach_scores);
                recreated = true;
                index.insert(&chunks, source).await.map_err(|e| {
                    error!(source, error = %e, "insert failed after recreating index");
                    upload_error(e)
                })?
            }
            Err(e) => {
                error!(source, error = %e, "failed to insert chunks");
                if was_active {
                    state.index = Some(index);
                }
                return Err(upload_error(e));
            }
        };

        let report = UploadReport {
            source: source.map(str::to_string),
            chunks_added,
            total_records: index.count(),
            recreated,
        };
        state.index = Some(index);

        info!(
            source,
            chunks_added = report.chunks_added,
            total_records = report.total_records,
            recreated = report.recreated,
            "upload complete"
        );
        Ok(report)
    }

    /// Stage `document` under the upload directory, extract its text and
    /// [`upload`](Session::upload) it with the file name as source label.
    pub async fn upload_document(
        &self,
        document: Document,
    ) -> std::result::Result<UploadReport, UploadError> {
        let staged = self.stage(&document).await.map_err(|e| {
            error!(document = %document.name, error = %e, "failed to stage upload");
            UploadError::Staging(e)
        })?;
        debug!(
            document = %document.name,
            kind = %document.kind,
            path = %staged.display(),
            "staged upload"
        );

        let text = self.extractor.extract(&document).await.map_err(|e| {
            error!(document = %document.name, error = %e, "text extraction failed");
            UploadError::Extraction(e)
        })?;

        let label = staged_name(&document);
        self.upload(&text, Some(&label)).await
    }

    /// Answer `question` from the `k` most relevant chunks.
    ///
    /// Never fails: a blank question or a missing document yields
    /// [`Answer::unknown`], and model failures yield an error answer.
    pub async fn ask(&self, question: &str, k: usize) -> Answer {
        let question = question.trim();
        if question.is_empty() {
            debug!("blank question");
            return Answer::unknown();
        }

        {
            let state = self.state.read().await;
            if state.index.is_some() && state.model.is_some() {
                return self.answer(&state, question, k).await;
            }
        }

        let mut state = self.state.write().await;
        self.load_index(&mut state).await;

        let has_records = state.index.as_ref().is_some_and(|index| index.count() > 0);
        if !has_records {
            debug!("no document uploaded");
            return Answer::unknown();
        }

        if state.model.is_none() {
            let name = self.config.generative_model.as_str();
            match self.model_loader.load(name).await {
                Ok(model) => {
                    info!(model = name, "loaded generative model");
                    state.model = Some(model);
                }
                Err(e) => {
                    error!(model = name, error = %e, "failed to load generative model");
                    return Answer::pipeline_error(e);
                }
            }
        }

        let state = state.downgrade();
        self.answer(&state, question, k).await
    }

    /// [`ask`](Session::ask) with the configured default `k`.
    pub async fn ask_default(&self, question: &str) -> Answer {
        self.ask(question, self.config.default_k).await
    }

    /// Run only the retrieval step, returning the chunks `ask` would ground on.
    ///
    /// Returns nothing if retrieval exceeds the configured timeout.
    pub async fn retrieve_contexts(&self, question: &str, k: usize) -> Vec<EmbeddingRecord> {
        let mut state = self.state.write().await;
        self.load_index(&mut state).await;
        let state = state.downgrade();
        self.retrieve(state.index.as_ref(), question, k).await.unwrap_or_default()
    }

    /// Drop the model, clear staged uploads and destroy the persisted index.
    ///
    /// The in-memory index is cleared even when deletion fails.
    ///
    /// # Errors
    ///
    /// See [`purge_storage`].
    pub async fn reset(&self) -> std::result::Result<(), ResetError> {
        let mut state = self.state.write().await;
        state.model = None;
        let index = state.index.take();
        purge(index, &self.config).await
    }

    /// Current status, loading a persisted index if one exists.
    pub async fn status(&self) -> SessionStatus {
        if self.document_count().await > 0 {
            SessionStatus::Ready
        } else {
            SessionStatus::NoDocument
        }
    }

    /// Number of records in the active index, loading a persisted one if needed.
    pub async fn document_count(&self) -> usize {
        let mut state = self.state.write().await;
        self.load_index(&mut state).await;
        state.index.as_ref().map_or(0, VectorIndex::count)
    }

    /// Switch to a different embedding provider.
    ///
    /// The in-memory index is released; the next access reopens the persisted
    /// snapshot with the new provider. If its dimensionality differs, the next
    /// upload rebuilds the index.
    pub async fn replace_embedding_provider(&self, embedder: Arc<dyn EmbeddingProvider>) {
        let mut state = self.state.write().await;
        info!(dimensions = embedder.dimensions(), "replacing embedding provider");
        state.embedder = embedder;
        state.index = None;
    }

    async fn answer(&self, state: &SessionState, question: &str, k: usize) -> Answer {
        let (Some(index), Some(model)) = (state.index.as_ref(), state.model.as_ref()) else {
            return Answer::unknown();
        };
        match self.retrieve(Some(index), question, k).await {
            Some(retrieved) => self.composer.compose(question, &retrieved, model.as_ref()).await,
            None => Answer::pipeline_error(format!(
                "retrieval timed out after {:?}",
                self.config.retrieval_timeout
            )),
        }
    }

    /// Retrieval bounded by `retrieval_timeout`; `None` on timeout.
    async fn retrieve(
        &self,
        index: Option<&VectorIndex>,
        question: &str,
        k: usize,
    ) -> Option<Vec<EmbeddingRecord>> {
        let timeout = self.config.retrieval_timeout;
        let retriever = Retriever::new(k);
        let retrieval = retriever.retrieve(index, question);
        match tokio::time::timeout(timeout, retrieval).await {
            Ok(retrieved) => Some(retrieved),
            Err(_) => {
                warn!(?timeout, k, "retrieval timed out");
                None
            }
        }
    }

    async fn load_index(&self, state: &mut SessionState) {
        if state.index.is_some() {
            return;
        }
        let embedder = Arc::clone(&state.embedder);
        match VectorIndex::open(&self.config.persist_location, embedder).await {
            Ok(Some(index)) => {
                state.index = Some(index.with_scores(self.config.attach_scores));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    location = %self.config.persist_location.display(),
                    error = %e,
                    "persisted index could not be loaded"
                );
            }
        }
    }

    async fn open_for_upload(
        &self,
        location: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> std::result::Result<(VectorIndex, bool), UploadError> {
        match VectorIndex::open_or_create(location, Arc::clone(&embedder)).await {
            Ok(index) => Ok((index, false)),
            Err(e @ RagError::CorruptIndex { .. }) => {
                warn!(location = %location.display(), error = %e, "discarding corrupt index");
                VectorIndex::destroy(None, location, self.config.removal)
                    .await
                    .map_err(UploadError::IndexFailure)?;
                let index = VectorIndex::create(location, embedder)
                    .await
                    .map_err(UploadError::IndexFailure)?;
                Ok((index, true))
            }
            Err(e) => {
                error!(location = %location.display(), error = %e, "cannot open index for upload");
                Err(UploadError::IndexFailure(e))
            }
        }
    }

    async fn stage(&self, document: &Document) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.config.upload_dir).await?;
        let path = self.config.upload_dir.join(staged_name(document));
        fs::write(&path, &document.bytes).await?;
        Ok(path)
    }
}

/// Clear staged uploads and destroy the persisted index described by
/// `config`, without a session or any backend.
///
/// Staged uploads are removed best-effort; failures are logged.
///
/// # Errors
///
/// - [`ResetError::NotAnIndex`] if the persist location holds files that do
///   not belong to an index. Nothing there is deleted.
/// - [`ResetError::DirectoryLocked`] if the index directory could not be
///   removed within the configured retries.
pub async fn purge_storage(config: &SmartDocConfig) -> std::result::Result<(), ResetError> {
    purge(None, config).await
}

async fn purge(
    index: Option<VectorIndex>,
    config: &SmartDocConfig,
) -> std::result::Result<(), ResetError> {
    clear_staged_uploads(&config.upload_dir).await;

    let location = config.persist_location.as_path();
    VectorIndex::destroy(index, location, config.removal).await.map_err(|e| {
        error!(location = %location.display(), error = %e, "reset failed");
        match e {
            RagError::DirectoryLocked { .. } => ResetError::DirectoryLocked(e),
            other => ResetError::NotAnIndex(other),
        }
    })?;

    info!(location = %location.display(), "storage reset");
    Ok(())
}

async fn clear_staged_uploads(dir: &Path) {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "could not list staged uploads");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "could not list staged uploads");
                break;
            }
        };
        let path = entry.path();
        let removed = match entry.file_type().await {
            Ok(file_type) if file_type.is_dir() => fs::remove_dir_all(&path).await,
            _ => fs::remove_file(&path).await,
        };
        if let Err(e) = removed {
            warn!(path = %path.display(), error = %e, "could not remove staged upload");
        }
    }
}

/// File name a document is staged and labelled under. Directory components
/// in the uploaded name are discarded.
fn staged_name(document: &Document) -> String {
    Path::new(&document.name)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("upload.{}", document.kind))
}

fn upload_error(e: RagError) -> UploadError {
    match e {
        RagError::Embedding { .. } | RagError::DimensionMismatch { .. } => {
            UploadError::EmbeddingFailure(e)
        }
        other => UploadError::IndexFailure(other),
    }
}

/// Builder for a [`Session`].
///
/// The embedding provider and a model (or model loader) are required. The
/// configuration defaults to [`SmartDocConfig::default`] and the extractor to
/// [`PlainTextExtractor`].
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<SmartDocConfig>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    model_loader: Option<Arc<dyn ModelLoader>>,
    extractor: Option<Arc<dyn TextExtractor>>,
}

impl SessionBuilder {
    /// Set the session configuration.
    pub fn config(mut self, config: SmartDocConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the loader used to obtain the generative model on first ask.
    pub fn model_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.model_loader = Some(loader);
        self
    }

    /// Use an already constructed generative model.
    pub fn model(self, model: Arc<dyn GenerativeModel>) -> Self {
        self.model_loader(Arc::new(StaticModelLoader::new(model)))
    }

    /// Set the text extractor used by [`Session::upload_document`].
    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Build the [`Session`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the embedding provider or model loader
    /// is missing.
    pub fn build(self) -> Result<Session> {
        let config = self.config.unwrap_or_default();
        let embedder = self
            .embedder
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        let model_loader = self
            .model_loader
            .ok_or_else(|| RagError::Config("model_loader is required".to_string()))?;

        Ok(Session {
            chunker: RecursiveChunker::from_config(&config),
            composer: AnswerComposer::new(config.model_timeout),
            model_loader,
            extractor: self.extractor.unwrap_or_else(|| Arc::new(PlainTextExtractor)),
            state: RwLock::new(SessionState { embedder, index: None, model: None }),
            config,
        })
    }
}
