//! Data types for uploaded documents and indexed records.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// The declared format of an uploaded document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Csv,
    Txt,
}

impl DocumentKind {
    /// Infer the kind from a file extension, case-insensitively.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "csv" => Some(Self::Csv),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Txt => "txt",
        };
        f.write_str(name)
    }
}

/// A raw upload. Only lives for the duration of upload handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File name as given by the uploader.
    pub name: String,
    /// Declared format.
    pub kind: DocumentKind,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

impl Document {
    /// Create a document from its name, kind and contents.
    pub fn new(name: impl Into<String>, kind: DocumentKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), kind, bytes: bytes.into() }
    }
}

/// Metadata stored alongside each embedding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    /// Page or position label of the chunk's origin, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Ordinal of the chunk within its upload.
    pub position: usize,
    /// Relevance score in `[0, 1]`. Only ever set on search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl RecordMetadata {
    /// Human-readable origin used in source listings.
    pub fn source_label(&self) -> &str {
        self.source.as_deref().unwrap_or("Unknown")
    }
}

/// A chunk of text with its embedding, as stored in a
/// [`VectorIndex`](crate::VectorIndex).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    /// Insertion sequence number, unique within an index.
    pub id: u64,
    /// The chunk text.
    pub text: String,
    /// The embedding vector for `text`.
    pub embedding: Vec<f32>,
    /// Origin and relevance metadata.
    pub metadata: RecordMetadata,
}
