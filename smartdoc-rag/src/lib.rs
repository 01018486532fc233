//! Retrieval-augmented document question answering.
//!
//! This crate provides:
//! - A recursive, overlap-aware text [`RecursiveChunker`]
//! - A directory-backed [`VectorIndex`] with cosine search and forced teardown
//! - A [`Retriever`] that adapts `k` to the index size
//! - An [`AnswerComposer`] that grounds a generative model in retrieved context
//! - A [`Session`] tying upload, ask and reset together
//!
//! Embedding, generation and text extraction are pluggable through the
//! [`EmbeddingProvider`], [`GenerativeModel`]/[`ModelLoader`] and
//! [`TextExtractor`] traits. Enable the `gemini` feature for a REST backend.

pub mod answer;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod model;
pub mod retriever;
pub mod session;
pub mod testing;

#[cfg(feature = "gemini")]
pub mod gemini;

pub use answer::{Answer, AnswerComposer, UNKNOWN_ANSWER, UNRELATED_ANSWER};
pub use chunking::RecursiveChunker;
pub use config::{RemovalPolicy, SmartDocConfig, SmartDocConfigBuilder};
pub use document::{Document, DocumentKind, EmbeddingRecord, RecordMetadata};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, ResetError, Result, UploadError};
pub use extract::{PlainTextExtractor, TextExtractor};
pub use index::{IndexSummary, VectorIndex};
pub use model::{ContentPart, GenerativeModel, ModelLoader, ModelResponse, StaticModelLoader};
pub use retriever::Retriever;
pub use session::{Session, SessionBuilder, SessionStatus, UploadReport, purge_storage};
