//! Top-k retrieval over a [`VectorIndex`].

use tracing::{debug, warn};

use crate::document::EmbeddingRecord;
use crate::index::VectorIndex;

/// Fetches the chunks most relevant to a question.
///
/// `k` adapts to the index: `min(default_k, max(1, count))`. Missing indexes,
/// empty indexes and search failures all yield an empty result, since a lack
/// of context is an ordinary outcome that the answer composer handles.
#[derive(Debug, Clone, Copy)]
pub struct Retriever {
    default_k: usize,
}

impl Retriever {
    /// Create a retriever asking for up to `default_k` chunks. Zero is treated as one.
    pub fn new(default_k: usize) -> Self {
        Self { default_k: default_k.max(1) }
    }

    /// The number of neighbours that will be requested from `index`.
    pub fn effective_k(&self, index: &VectorIndex) -> usize {
        self.default_k.min(index.count().max(1))
    }

    /// Return the closest records to `question`, closest first.
    pub async fn retrieve(
        &self,
        index: Option<&VectorIndex>,
        question: &str,
    ) -> Vec<EmbeddingRecord> {
        let Some(index) = index else {
            debug!("no index, nothing to retrieve");
            return Vec::new();
        };

        let k = self.effective_k(index);
        debug!(k, available = index.count(), "retrieving context");

        match index.similarity_search(question, k).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "similarity search failed, answering without context");
                Vec::new()
            }
        }
    }
}
