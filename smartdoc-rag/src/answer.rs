//! Grounded answer composition.
//!
//! The [`AnswerComposer`] turns retrieved chunks and a question into a prompt
//! that restricts the model to that context, runs the model, and renders the
//! result for the user. It never returns an error: model failures become an
//! [`Answer`] describing the failure.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::document::{EmbeddingRecord, RecordMetadata};
use crate::model::GenerativeModel;

/// Sentinel the model is told to reply with when the context lacks the answer.
pub const UNKNOWN_ANSWER: &str = "I don't know";

/// Shown when the model replies with the sentinel.
pub const UNRELATED_ANSWER: &str =
    "This question appears to be unrelated to the uploaded document.";

/// Phrasings of the sentinel recognised in model output, lower-case.
const UNKNOWN_PHRASES: [&str; 3] = ["i don't know", "i dont know", "i do not know"];

/// Confidence assumed for a record that carries no score.
const DEFAULT_SCORE: f32 = 0.5;

/// A user-facing answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// Rendered answer text.
    pub text: String,
    /// Whether the text is backed by retrieved context.
    pub grounded: bool,
    /// Metadata of the chunks the answer draws on, in retrieval order.
    pub sources: Vec<RecordMetadata>,
    /// Heuristic confidence in `[0, 1]`; see [`confidence`].
    pub confidence: f32,
}

impl Answer {
    /// The canonical answer when there is nothing to ground on.
    pub fn unknown() -> Self {
        Self {
            text: UNKNOWN_ANSWER.to_string(),
            grounded: false,
            sources: Vec::new(),
            confidence: 0.0,
        }
    }

    /// An answer reporting a pipeline failure instead of propagating it.
    pub fn pipeline_error(error: impl Display) -> Self {
        Self {
            text: format!("RAG pipeline error: {error}"),
            grounded: false,
            sources: Vec::new(),
            confidence: 0.0,
        }
    }

    fn unrelated(confidence: f32) -> Self {
        Self {
            text: UNRELATED_ANSWER.to_string(),
            grounded: false,
            sources: Vec::new(),
            confidence,
        }
    }

    /// True for [`Answer::unknown`].
    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

/// Build the grounding prompt. `context` and `question` are the only dynamic parts.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are SmartDoc, a document analysis expert.\n\
         Answer ONLY using the context below.\n\
         \n\
         If the answer is NOT found in the context,\n\
         reply exactly: {UNKNOWN_ANSWER}\n\
         \n\
         --------------------------------\n\
         CONTEXT:\n\
         {context}\n\
         \n\
         QUESTION:\n\
         {question}\n\
         \n\
         ANSWER:\n"
    )
}

/// Whether model output is a restatement of the "I don't know" sentinel.
///
/// This is plain substring matching, so an otherwise valid answer that
/// happens to contain one of the phrases is also treated as unknown.
pub fn is_unknown_reply(text: &str) -> bool {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    UNKNOWN_PHRASES.iter().any(|phrase| normalized.contains(phrase))
}

/// Heuristic confidence for a set of retrieved records.
///
/// The mean of each record's `score` (missing scores count as 0.5), rounded to
/// two decimals. 0.5 when no record has a score, 0.0 when nothing was
/// retrieved. This is a proxy derived from retrieval similarity, not a
/// calibrated probability of the answer being correct.
pub fn confidence(retrieved: &[EmbeddingRecord]) -> f32 {
    if retrieved.is_empty() {
        return 0.0;
    }

    let scores: Vec<Option<f32>> = retrieved
        .iter()
        .map(|record| record.metadata.score.filter(|s| s.is_finite()))
        .collect();
    if scores.iter().all(Option::is_none) {
        return DEFAULT_SCORE;
    }

    let sum: f32 = scores.iter().map(|s| s.unwrap_or(DEFAULT_SCORE)).sum();
    let mean = (sum / scores.len() as f32).clamp(0.0, 1.0);
    (mean * 100.0).round() / 100.0
}

/// Composes grounded answers from retrieved context.
#[derive(Debug, Clone, Copy)]
pub struct AnswerComposer {
    model_timeout: Duration,
}

impl AnswerComposer {
    /// Create a composer that gives the model at most `model_timeout` per call.
    pub fn new(model_timeout: Duration) -> Self {
        Self { model_timeout }
    }

    /// Answer `question` from `retrieved`.
    ///
    /// With nothing retrieved the model is not called and
    /// [`Answer::unknown`] is returned.
    pub async fn compose(
        &self,
        question: &str,
        retrieved: &[EmbeddingRecord],
        model: &dyn GenerativeModel,
    ) -> Answer {
        if retrieved.is_empty() {
            debug!("no context retrieved, skipping model call");
            return Answer::unknown();
        }

        let context =
            retrieved.iter().map(|record| record.text.as_str()).collect::<Vec<_>>().join("\n\n");
        let prompt = build_prompt(&context, question);
        let confidence = confidence(retrieved);

        debug!(
            model = model.name(),
            chunk_count = retrieved.len(),
            prompt_len = prompt.len(),
            "invoking generative model"
        );

        let call = tokio::time::timeout(self.model_timeout, model.generate(&prompt));
        let response = match call.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(model = model.name(), error = %e, "model invocation failed");
                return Answer::pipeline_error(e);
            }
            Err(_) => {
                error!(
                    model = model.name(),
                    timeout = ?self.model_timeout,
                    "model invocation timed out"
                );
                return Answer::pipeline_error(format!(
                    "model call timed out after {:?}",
                    self.model_timeout
                ));
            }
        };

        let reply = response.into_text();
        let reply = reply.trim();

        if is_unknown_reply(reply) {
            info!(confidence, "model could not answer from context");
            return Answer::unrelated(confidence);
        }

        let source_lines = retrieved
            .iter()
            .enumerate()
            .map(|(i, record)| format!("{}. {}", i + 1, record.metadata.source_label()))
            .collect::<Vec<_>>()
            .join("\n");

        info!(confidence, source_count = retrieved.len(), "composed grounded answer");

        Answer {
            text: format!("{reply}\n\nSources:\n{source_lines}"),
            grounded: true,
            sources: retrieved.iter().map(|record| record.metadata.clone()).collect(),
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelResponse;
    use crate::testing::{Script, ScriptedModel};

    fn record(text: &str, source: Option<&str>, score: Option<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: 0,
            text: text.to_string(),
            embedding: vec![1.0],
            metadata: RecordMetadata { source: source.map(str::to_string), position: 0, score },
        }
    }

    fn composer() -> AnswerComposer {
        AnswerComposer::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn empty_context_skips_the_model() {
        let model = ScriptedModel::reply("should not be called");
        let answer = composer().compose("anything?", &[], &model).await;
        assert_eq!(answer, Answer::unknown());
        assert!(answer.is_unknown());
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn prompt_contains_context_in_order_and_question() {
        let model = ScriptedModel::reply("Blue.");
        let retrieved = [record("first", None, None), record("second", None, None)];
        composer().compose("What color?", &retrieved, &model).await;

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("CONTEXT:\nfirst\n\nsecond\n"));
        assert!(prompts[0].contains("QUESTION:\nWhat color?\n"));
        assert!(prompts[0].contains("reply exactly: I don't know"));
    }

    #[tokio::test]
    async fn grounded_answer_lists_sources() {
        let model = ScriptedModel::reply("  The sky is blue.\n");
        let retrieved =
            [record("sky", Some("doc.txt (chunk 1)"), Some(0.9)), record("grass", None, None)];
        let answer = composer().compose("sky?", &retrieved, &model).await;

        assert!(answer.grounded);
        assert_eq!(
            answer.text,
            "The sky is blue.\n\nSources:\n1. doc.txt (chunk 1)\n2. Unknown"
        );
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.confidence, 0.7);
    }

    #[tokio::test]
    async fn sentinel_variants_render_unrelated_message() {
        let replies =
            ["I don't know", "i DONT know.", "Sorry, I do not know that.", "I don\u{2019}t know"];
        for reply in replies {
            let model = ScriptedModel::reply(reply);
            let answer = composer().compose("q", &[record("ctx", Some("a"), None)], &model).await;
            assert_eq!(answer.text, UNRELATED_ANSWER, "reply {reply:?}");
            assert!(!answer.grounded);
            assert!(answer.sources.is_empty());
        }
    }

    #[tokio::test]
    async fn model_failure_becomes_error_answer() {
        let model = ScriptedModel::new(Script::Fail("quota exceeded".into()));
        let answer = composer().compose("q", &[record("ctx", None, None)], &model).await;
        assert!(answer.text.starts_with("RAG pipeline error:"));
        assert!(answer.text.contains("quota exceeded"));
        assert!(!answer.grounded);
        assert_eq!(answer.confidence, 0.0);
    }

    #[tokio::test]
    async fn structured_responses_are_flattened() {
        let model = ScriptedModel::new(Script::Reply(ModelResponse::from_json(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "Green" }, " grass"] } }]
        }))));
        let answer = composer().compose("q", &[record("ctx", None, None)], &model).await;
        assert!(answer.text.starts_with("Green grass\n\nSources:"));
    }

    #[test]
    fn confidence_defaults() {
        assert_eq!(confidence(&[]), 0.0);
        assert_eq!(confidence(&[record("a", None, None), record("b", None, None)]), 0.5);
        let mixed = [record("a", None, Some(0.333)), record("b", None, Some(0.9))];
        assert_eq!(confidence(&mixed), 0.62);
        assert_eq!(confidence(&[record("a", None, Some(f32::NAN))]), 0.5);
    }

    #[test]
    fn sentinel_detection_is_case_insensitive() {
        assert!(is_unknown_reply("I DON'T KNOW"));
        assert!(!is_unknown_reply("The answer is 42."));
    }
}
