//! Error types for the `smartdoc-rag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in SmartDoc RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// The caller supplied unusable input (empty document, empty question).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred while invoking the generative model.
    #[error("Model error ({provider}): {message}")]
    Model {
        /// The model provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// New embeddings do not match the dimensionality the index was created with.
    #[error("Embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality established by the index.
        expected: usize,
        /// Dimensionality of the offending embedding.
        actual: usize,
    },

    /// The persisted index could not be read or written.
    #[error("Index storage error at {}: {message}", path.display())]
    Storage {
        /// The persist location involved.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The index snapshot exists but cannot be parsed or is internally inconsistent.
    #[error("Corrupt vector index at {}: {message}", path.display())]
    CorruptIndex {
        /// The persist location involved.
        path: PathBuf,
        /// A description of the corruption.
        message: String,
    },

    /// The persisted index directory could not be removed within the retry budget.
    #[error("Directory {} is locked: {source}", path.display())]
    DirectoryLocked {
        /// The directory that could not be removed.
        path: PathBuf,
        /// The last removal error.
        #[source]
        source: std::io::Error,
    },

    /// Text could not be extracted from an uploaded document.
    #[error("Extraction error: {0}")]
    Extraction(String),
}

impl RagError {
    pub(crate) fn storage(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Storage { path: path.into(), message: message.to_string() }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::CorruptIndex { path: path.into(), message: message.to_string() }
    }
}

/// A convenience result type for SmartDoc RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Reasons an upload can fail.
///
/// The session keeps its previous corpus in every case except a failed retry
/// after a dimensionality change, where the old index was already destroyed.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The extracted text was empty or whitespace-only.
    #[error("No readable text in document")]
    EmptyText,

    /// The chunker could not split the text.
    #[error("Failed to chunk document: {0}")]
    ChunkingFailure(#[source] RagError),

    /// The embedding provider failed, or dimensions still disagreed after recreating the index.
    #[error("Failed to embed document: {0}")]
    EmbeddingFailure(#[source] RagError),

    /// The persisted index could not be opened, written, or recreated.
    #[error("Failed to store embeddings: {0}")]
    IndexFailure(#[source] RagError),

    /// The text extractor rejected the document.
    #[error("Failed to extract text: {0}")]
    Extraction(#[source] RagError),

    /// The raw upload could not be written to the staging directory.
    #[error("Failed to save uploaded file: {0}")]
    Staging(#[source] std::io::Error),
}

/// Reasons a reset can fail. The in-memory index is cleared in every case.
#[derive(Debug, Error)]
pub enum ResetError {
    /// The persisted index directory could not be deleted.
    #[error("Failed to reset vector index: {0}")]
    DirectoryLocked(#[source] RagError),

    /// The persist location holds files that do not belong to a vector index,
    /// so it was left alone.
    #[error("Refusing to reset: {0}")]
    NotAnIndex(#[source] RagError),
}
