//! Persistent vector index.
//!
//! A [`VectorIndex`] lives in a directory holding a single JSON snapshot
//! (`index.json`). Every insert rewrites the snapshot through a temporary
//! file and an atomic rename, and only then commits the new records in
//! memory, so a failed insert leaves both copies untouched.
//!
//! A directory counts as an index only if it is empty or holds the snapshot
//! (or its temporary file). Anything else is reported and never deleted.
//!
//! Destruction is two-phase: the in-memory index is released first, then the
//! directory is force-deleted with bounded retries (see [`RemovalPolicy`]).

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::RemovalPolicy;
use crate::document::{EmbeddingRecord, RecordMetadata};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const SNAPSHOT_FILE: &str = "index.json";
const SNAPSHOT_TMP_FILE: &str = "index.json.tmp";

#[derive(Deserialize)]
struct Snapshot {
    dimensions: Option<usize>,
    next_id: u64,
    records: Vec<EmbeddingRecord>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    dimensions: Option<usize>,
    next_id: u64,
    records: Vec<&'a EmbeddingRecord>,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A directory-backed collection of [`EmbeddingRecord`]s with cosine search.
///
/// All records share one embedding dimensionality, fixed by the first insert.
///
/// # Example
///
/// ```rust,ignore
/// use smartdoc_rag::VectorIndex;
///
/// let mut index = VectorIndex::open_or_create("./vectorstore", embedder).await?;
/// index.insert(&chunks, Some("notes.txt")).await?;
/// let hits = index.similarity_search("what colour is the sky?", 3).await?;
/// ```
pub struct VectorIndex {
    location: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    dimensions: Option<usize>,
    next_id: u64,
    records: Vec<EmbeddingRecord>,
    attach_scores: bool,
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("location", &self.location)
            .field("dimensions", &self.dimensions)
            .field("count", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Load the index persisted at `location`.
    ///
    /// Returns `Ok(None)` when there is no persisted state: the directory is
    /// missing or empty.
    ///
    /// # Errors
    ///
    /// - [`RagError::CorruptIndex`] if the snapshot (or an interrupted write
    ///   of it) is present but cannot be parsed or is inconsistent.
    /// - [`RagError::Storage`] if the location is not a directory, holds files
    ///   that do not belong to an index, or cannot be read.
    pub async fn open(
        location: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Option<Self>> {
        let location = location.into();
        let Some(snapshot) = load_snapshot(&location).await? else {
            debug!(location = %location.display(), "no persisted index");
            return Ok(None);
        };

        info!(
            location = %location.display(),
            count = snapshot.records.len(),
            dimensions = ?snapshot.dimensions,
            "loaded vector index"
        );

        Ok(Some(Self {
            location,
            embedder,
            dimensions: snapshot.dimensions,
            next_id: snapshot.next_id,
            records: snapshot.records,
            attach_scores: true,
        }))
    }

    /// Read the record count and dimensionality persisted at `location`
    /// without an embedding provider.
    ///
    /// # Errors
    ///
    /// Same as [`open`](VectorIndex::open).
    pub async fn inspect(location: &Path) -> Result<Option<IndexSummary>> {
        Ok(load_snapshot(location).await?.map(|snapshot| IndexSummary {
            count: snapshot.records.len(),
            dimensions: snapshot.dimensions,
        }))
    }

    /// Create an empty index at `location`, writing an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the directory or snapshot cannot be written.
    pub async fn create(
        location: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let location = location.into();
        fs::create_dir_all(&location).await.map_err(|e| {
            error!(location = %location.display(), error = %e, "failed to create directory");
            RagError::storage(&location, format!("failed to create directory: {e}"))
        })?;

        let index = Self {
            location,
            embedder,
            dimensions: None,
            next_id: 0,
            records: Vec::new(),
            attach_scores: true,
        };
        index.write_snapshot(None, 0, index.records.iter().collect()).await?;

        info!(location = %index.location.display(), "created vector index");
        Ok(index)
    }

    /// Load the index at `location`, creating an empty one if none exists.
    pub async fn open_or_create(
        location: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let location = location.into();
        match Self::open(&location, Arc::clone(&embedder)).await? {
            Some(index) => Ok(index),
            None => Self::create(location, embedder).await,
        }
    }

    /// Choose whether search results carry their similarity in `metadata.score`.
    pub fn with_scores(mut self, attach: bool) -> Self {
        self.attach_scores = attach;
        self
    }

    /// Number of stored records.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Embedding dimensionality, once the first record is inserted.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    /// Directory holding the persisted snapshot.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// All records in insertion order.
    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Embed `chunks` and append them as new records.
    ///
    /// `source` labels where the chunks came from (typically the uploaded file
    /// name). Returns the number of records added.
    ///
    /// # Errors
    ///
    /// - [`RagError::Embedding`] if the provider fails or returns the wrong number of vectors.
    /// - [`RagError::DimensionMismatch`] if any vector's length differs from the
    ///   index's dimensionality, or from the other vectors in the batch.
    /// - [`RagError::Storage`] if the snapshot cannot be written.
    ///
    /// On error the index is unchanged in memory and on disk.
    pub async fn insert(&mut self, chunks: &[String], source: Option<&str>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding {
                provider: "index".into(),
                message: format!(
                    "expected {} embeddings, provider returned {}",
                    chunks.len(),
                    embeddings.len()
                ),
            });
        }

        let expected = self.dimensions.unwrap_or(embeddings[0].len());
        if expected == 0 {
            return Err(RagError::Embedding {
                provider: "index".into(),
                message: "provider returned an empty embedding".into(),
            });
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            warn!(
                location = %self.location.display(),
                expected,
                actual = bad.len(),
                "embedding dimension mismatch"
            );
            return Err(RagError::DimensionMismatch { expected, actual: bad.len() });
        }

        let new_records: Vec<EmbeddingRecord> = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(position, (text, embedding))| EmbeddingRecord {
                id: self.next_id + position as u64,
                text: text.clone(),
                embedding,
                metadata: RecordMetadata {
                    source: source.map(|s| format!("{s} (chunk {})", position + 1)),
                    position,
                    score: None,
                },
            })
            .collect();
        let next_id = self.next_id + new_records.len() as u64;

        let all_records = self.records.iter().chain(&new_records).collect();
        self.write_snapshot(Some(expected), next_id, all_records).await?;

        let added = new_records.len();
        self.records.extend(new_records);
        self.dimensions = Some(expected);
        self.next_id = next_id;

        info!(
            location = %self.location.display(),
            added,
            count = self.records.len(),
            dimensions = expected,
            "inserted records"
        );
        Ok(added)
    }

    /// Return the `k` records closest to `query` by cosine similarity.
    ///
    /// Closest first; ties keep insertion order. `k` is not clamped here.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] if the query cannot be embedded and
    /// [`RagError::DimensionMismatch`] if the query vector has the wrong length.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<EmbeddingRecord>> {
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        if let Some(expected) = self.dimensions {
            if query_embedding.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: query_embedding.len(),
                });
            }
        }

        let mut scored: Vec<(f32, &EmbeddingRecord)> = self
            .records
            .iter()
            .map(|record| (cosine_similarity(&record.embedding, &query_embedding), record))
            .collect();

        // `sort_by` is stable, so equal scores stay in insertion order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let results: Vec<EmbeddingRecord> = scored
            .into_iter()
            .take(k)
            .map(|(similarity, record)| {
                let mut record = record.clone();
                record.metadata.score = self.attach_scores.then(|| similarity.clamp(0.0, 1.0));
                record
            })
            .collect();

        debug!(k, result_count = results.len(), "similarity search completed");
        Ok(results)
    }

    /// Release `index` (if any) and delete everything persisted at `location`.
    ///
    /// A missing directory and a `None` index make this a no-op. A location
    /// that is not a directory, or a directory that holds neither a snapshot
    /// nor is empty, is never deleted.
    ///
    /// # Errors
    ///
    /// - [`RagError::Storage`] if `location` does not look like an index.
    /// - [`RagError::DirectoryLocked`] once the removal retries are exhausted.
    pub async fn destroy(
        index: Option<Self>,
        location: &Path,
        policy: RemovalPolicy,
    ) -> Result<()> {
        if let Some(index) = index {
            release(index, policy).await;
        }
        if let Ok(LocationState::Foreign(reason)) = inspect_location(location).await {
            error!(location = %location.display(), reason, "refusing to delete");
            return Err(RagError::storage(location, format!("not a vector index: {reason}")));
        }
        force_remove_dir(location, policy).await
    }

    async fn write_snapshot(
        &self,
        dimensions: Option<usize>,
        next_id: u64,
        records: Vec<&EmbeddingRecord>,
    ) -> Result<()> {
        let snapshot = SnapshotRef { dimensions, next_id, records };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| RagError::storage(&self.location, format!("failed to serialize: {e}")))?;

        let tmp_path = self.location.join(SNAPSHOT_TMP_FILE);
        let final_path = self.location.join(SNAPSHOT_FILE);
        fs::write(&tmp_path, &bytes).await.map_err(|e| {
            error!(location = %self.location.display(), error = %e, "failed to write snapshot");
            let message = format!("failed to write {SNAPSHOT_TMP_FILE}: {e}");
            RagError::storage(&self.location, message)
        })?;
        fs::rename(&tmp_path, &final_path).await.map_err(|e| {
            error!(location = %self.location.display(), error = %e, "failed to commit snapshot");
            let message = format!("failed to replace {SNAPSHOT_FILE}: {e}");
            RagError::storage(&self.location, message)
        })
    }
}

/// Record count and dimensionality of a persisted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Number of stored records.
    pub count: usize,
    /// Embedding dimensionality, once the first record is inserted.
    pub dimensions: Option<usize>,
}

/// What lives at a persist location.
#[derive(Debug, PartialEq, Eq)]
enum LocationState {
    Missing,
    Empty,
    /// Holds a snapshot or a leftover temporary snapshot.
    Index,
    /// Something this crate did not write.
    Foreign(&'static str),
}

async fn inspect_location(location: &Path) -> Result<LocationState> {
    let metadata = match fs::metadata(location).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocationState::Missing),
        Err(e) => return Err(RagError::storage(location, format!("failed to stat: {e}"))),
    };
    if !metadata.is_dir() {
        return Ok(LocationState::Foreign("path is not a directory"));
    }

    for name in [SNAPSHOT_FILE, SNAPSHOT_TMP_FILE] {
        if fs::try_exists(location.join(name)).await.unwrap_or(false) {
            return Ok(LocationState::Index);
        }
    }

    let mut entries = fs::read_dir(location)
        .await
        .map_err(|e| RagError::storage(location, format!("failed to list directory: {e}")))?;
    let first = entries
        .next_entry()
        .await
        .map_err(|e| RagError::storage(location, format!("failed to list directory: {e}")))?;
    Ok(match first {
        None => LocationState::Empty,
        Some(_) => LocationState::Foreign("directory holds files but no index snapshot"),
    })
}

/// Read and validate the snapshot at `location`.
async fn load_snapshot(location: &Path) -> Result<Option<Snapshot>> {
    match inspect_location(location).await? {
        LocationState::Missing | LocationState::Empty => return Ok(None),
        LocationState::Foreign(reason) => {
            warn!(location = %location.display(), reason, "persist location is not a vector index");
            return Err(RagError::storage(location, format!("not a vector index: {reason}")));
        }
        LocationState::Index => {}
    }

    let bytes = match fs::read(location.join(SNAPSHOT_FILE)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RagError::corrupt(location, "interrupted write left no snapshot"));
        }
        Err(e) => {
            error!(location = %location.display(), error = %e, "failed to read index snapshot");
            return Err(RagError::storage(location, format!("failed to read {SNAPSHOT_FILE}: {e}")));
        }
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
        error!(location = %location.display(), error = %e, "corrupt index snapshot");
        RagError::corrupt(location, format!("unparseable {SNAPSHOT_FILE}: {e}"))
    })?;

    match snapshot.dimensions {
        Some(dimensions) => {
            if let Some(bad) = snapshot.records.iter().find(|r| r.embedding.len() != dimensions) {
                return Err(RagError::corrupt(
                    location,
                    format!(
                        "record {} has {} dimensions, index declares {dimensions}",
                        bad.id,
                        bad.embedding.len()
                    ),
                ));
            }
        }
        None if !snapshot.records.is_empty() => {
            return Err(RagError::corrupt(location, "records present without dimensions"));
        }
        None => {}
    }
    Ok(Some(snapshot))
}

/// Phase one of destruction: drop every handle the index holds, then give the
/// OS a moment to close anything released asynchronously.
async fn release(index: VectorIndex, policy: RemovalPolicy) {
    let location = index.location.clone();
    drop(index);
    if !policy.release_pause.is_zero() {
        tokio::time::sleep(policy.release_pause).await;
    }
    debug!(location = %location.display(), "released vector index");
}

/// Phase two of destruction: delete `path`, scrubbing it file by file and
/// backing off exponentially between attempts when a plain recursive delete
/// fails.
///
/// # Errors
///
/// Returns [`RagError::DirectoryLocked`] with the last I/O error when the
/// directory still exists after `policy.attempts` retries and a final attempt.
async fn force_remove_dir(path: &Path, policy: RemovalPolicy) -> Result<()> {
    if !fs::try_exists(path).await.unwrap_or(true) {
        return Ok(());
    }

    for attempt in 1..=policy.attempts {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                info!(path = %path.display(), attempt, "removed index directory");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    attempt,
                    attempts = policy.attempts,
                    error = %e,
                    "failed to remove index directory, scrubbing"
                );
                let owned = path.to_path_buf();
                if let Err(e) = tokio::task::spawn_blocking(move || scrub_tree(&owned)).await {
                    warn!(path = %path.display(), error = %e, "scrub task failed");
                }
                tokio::time::sleep(policy.delay_after(attempt)).await;
            }
        }
    }

    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => {
            error!(path = %path.display(), error = %source, "giving up on index directory");
            Err(RagError::DirectoryLocked { path: path.to_path_buf(), source })
        }
    }
}

/// Clear read-only flags everywhere under `root`, then delete files and empty
/// directories bottom-up. Individual failures are logged and skipped.
fn scrub_tree(root: &Path) {
    for entry in WalkDir::new(root).into_iter().filter_map(std::result::Result::ok) {
        if let Err(e) = clear_readonly(entry.path()) {
            debug!(path = %entry.path().display(), error = %e, "could not clear read-only flag");
        }
    }

    let entries = WalkDir::new(root).contents_first(true).into_iter();
    for entry in entries.filter_map(std::result::Result::ok) {
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        if let Err(e) = result {
            debug!(path = %entry.path().display(), error = %e, "could not remove entry");
        }
    }
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = std::fs::symlink_metadata(path)?.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
