//! Turning uploaded bytes into text.

use async_trait::async_trait;
use tracing::debug;

use crate::document::{Document, DocumentKind};
use crate::error::{RagError, Result};

/// Extracts plain text from an uploaded [`Document`].
///
/// Implementations fail with [`RagError::Extraction`] for unsupported or
/// corrupt input.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Return the document's text content.
    async fn extract(&self, document: &Document) -> Result<String>;
}

/// Built-in extractor for text-based formats.
///
/// `.txt` and `.csv` files are decoded as UTF-8, falling back to Latin-1 when
/// the bytes are not valid UTF-8 (Latin-1 maps every byte, so decoding never
/// fails). CSV rows are kept as-is, one per line. PDF is rejected; plug in a
/// dedicated [`TextExtractor`] for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, document: &Document) -> Result<String> {
        match document.kind {
            DocumentKind::Txt | DocumentKind::Csv => {
                Ok(decode_text(&document.name, &document.bytes))
            }
            DocumentKind::Pdf => Err(RagError::Extraction(format!(
                "{}: PDF extraction requires a dedicated extractor",
                document.name
            ))),
        }
    }
}

fn decode_text(name: &str, bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
        Err(e) => {
            debug!(document = name, error = %e, "not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn utf8_text_is_returned_verbatim() {
        let doc = Document::new("a.txt", DocumentKind::Txt, "héllo\nworld".as_bytes());
        assert_eq!(PlainTextExtractor.extract(&doc).await.unwrap(), "héllo\nworld");
    }

    #[tokio::test]
    async fn byte_order_mark_is_dropped() {
        let doc = Document::new("bom.csv", DocumentKind::Csv, "\u{feff}a,b\n1,2".as_bytes());
        assert_eq!(PlainTextExtractor.extract(&doc).await.unwrap(), "a,b\n1,2");
    }

    #[tokio::test]
    async fn invalid_utf8_falls_back_to_latin1() {
        let doc = Document::new("legacy.txt", DocumentKind::Txt, vec![b'c', b'a', b'f', 0xe9]);
        assert_eq!(PlainTextExtractor.extract(&doc).await.unwrap(), "café");
    }

    #[tokio::test]
    async fn pdf_is_rejected() {
        let doc = Document::new("report.pdf", DocumentKind::Pdf, b"%PDF-1.7".to_vec());
        let err = PlainTextExtractor.extract(&doc).await.unwrap_err();
        assert!(matches!(err, RagError::Extraction(ref msg) if msg.contains("report.pdf")));
    }
}
