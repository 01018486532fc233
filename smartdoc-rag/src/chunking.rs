//! Document chunking.
//!
//! [`RecursiveChunker`] splits text hierarchically: paragraphs, lines,
//! sentences, words, and finally single characters. Pieces are merged back
//! greedily up to `chunk_size` characters, carrying up to `chunk_overlap`
//! characters from the end of one chunk into the start of the next.
//!
//! All lengths are counted in `char`s so multi-byte text is never cut inside
//! a code point.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::SmartDocConfig;
use crate::error::{RagError, Result};

/// Separators tried in order, coarsest first. The empty separator splits
/// into single characters and always applies.
pub const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", ".\n", " ", ""];

/// Splits text into overlapping, bounded-length chunks.
///
/// # Example
///
/// ```rust,ignore
/// use smartdoc_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(500, 100);
/// let chunks = chunker.chunk(&text)?;
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size, chunk_overlap }
    }

    /// Create a chunker using the sizes from a validated configuration.
    pub fn from_config(config: &SmartDocConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split `text` into trimmed, non-empty chunks.
    ///
    /// Never returns an empty `Vec`: if every chunk collapses after trimming,
    /// the original text is returned as the only chunk.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if `text` is empty or whitespace-only.
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput("document text is empty".to_string()));
        }

        let mut chunks: Vec<String> = self
            .split_text(text, &SEPARATORS)
            .into_iter()
            .map(|chunk| chunk.trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect();

        if chunks.is_empty() {
            chunks.push(text.to_string());
        }

        debug!(
            chunk_count = chunks.len(),
            chunk_size = self.chunk_size,
            chunk_overlap = self.chunk_overlap,
            "chunked text"
        );
        Ok(chunks)
    }

    /// Split with the first separator present in `text`, recursing into any
    /// piece that is still too long with the remaining separators.
    fn split_text(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);
        let pieces = split_keeping_separator(text, separator);

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }

            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_text(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }

        chunks
    }

    /// Greedily join pieces into chunks of at most `chunk_size` characters.
    ///
    /// After a chunk is emitted, pieces are dropped from the front of the
    /// window until no more than `chunk_overlap` characters remain and the
    /// next piece fits.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, window.iter().copied().collect());

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(front);
                }
            }

            window.push_back(piece);
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut chunks, window.iter().copied().collect());
        }

        chunks
    }
}

fn pick_separator<'s>(text: &str, separators: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
    for (i, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (separator, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect();
    }

    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

fn push_trimmed(chunks: &mut Vec<String>, chunk: String) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace_text() {
        let chunker = RecursiveChunker::new(100, 10);
        assert!(matches!(chunker.chunk(""), Err(RagError::InvalidInput(_))));
        assert!(matches!(chunker.chunk("  \n\t "), Err(RagError::InvalidInput(_))));
    }

    #[test]
    fn short_text_is_a_single_trimmed_chunk() {
        let chunker = RecursiveChunker::new(1000, 150);
        let chunks = chunker.chunk("  The sky is blue. Grass is green.\n").unwrap();
        assert_eq!(chunks, vec!["The sky is blue. Grass is green.".to_string()]);
    }

    #[test]
    fn paragraphs_are_split_before_sentences() {
        let chunker = RecursiveChunker::new(40, 0);
        let text = "First paragraph is here.\n\nSecond paragraph follows it.";
        let chunks = chunker.chunk(text).unwrap();
        assert_eq!(chunks, vec!["First paragraph is here.", "Second paragraph follows it."]);
    }

    #[test]
    fn chunks_never_exceed_chunk_size() {
        let chunker = RecursiveChunker::new(50, 10);
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(20);
        let chunks = chunker.chunk(&text).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn adjacent_chunks_share_overlap() {
        let chunker = RecursiveChunker::new(20, 8);
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunker.chunk(text).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let first_word_of_next = pair[1].split(' ').next().unwrap();
            assert!(
                pair[0].contains(first_word_of_next),
                "expected overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let chunker = RecursiveChunker::new(10, 0);
        let text = "abcdefghijklmnopqrstuvwxy";
        let chunks = chunker.chunk(text).unwrap();
        assert_eq!(chunks, vec!["abcdefghij", "klmnopqrst", "uvwxy"]);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let chunker = RecursiveChunker::new(4, 1);
        let text = "éèêëàâäôöûü";
        let chunks = chunker.chunk(text).unwrap();
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert_eq!(chunks.first().map(String::as_str), Some("éèêë"));
    }

    #[test]
    fn separator_stays_with_preceding_segment() {
        let pieces = split_keeping_separator("a. b. c", ". ");
        assert_eq!(pieces, vec!["a. ", "b. ", "c"]);
    }

    #[test]
    fn from_config_uses_configured_sizes() {
        let config = SmartDocConfig::builder().chunk_size(30).chunk_overlap(5).build().unwrap();
        let chunker = RecursiveChunker::from_config(&config);
        assert_eq!(chunker.chunk_size, 30);
        assert_eq!(chunker.chunk_overlap, 5);
    }
}
