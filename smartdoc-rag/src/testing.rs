//! Deterministic, offline providers for tests and demos.
//!
//! Nothing here calls a network service, so sessions built from these types
//! run with zero API keys.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::model::{GenerativeModel, ModelResponse};

/// Bag-of-words embedder: each lower-cased alphanumeric token is hashed into
/// one of `dimensions` buckets and the counts are L2-normalised.
///
/// Texts sharing words score higher, and identical texts embed identically.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Create an embedder producing vectors of length `dimensions`.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return Ok(embedding);
        }
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimensions as u64) as usize;
            embedding[bucket] += 1.0;
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            embedding.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// An embedder that always fails, for exercising error paths.
#[derive(Debug, Clone, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::Embedding { provider: "failing".into(), message: "offline".into() })
    }

    fn dimensions(&self) -> usize {
        0
    }
}

/// What a [`ScriptedModel`] does with each prompt.
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer with the context block of the prompt, verbatim.
    EchoContext,
    /// Always return this response.
    Reply(ModelResponse),
    /// Always fail with this message.
    Fail(String),
}

/// A generative model driven by a [`Script`], recording every prompt it sees.
#[derive(Debug)]
pub struct ScriptedModel {
    script: Script,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    /// Create a model following `script`.
    pub fn new(script: Script) -> Self {
        Self { script, prompts: Mutex::new(Vec::new()) }
    }

    /// A model that answers with the retrieved context.
    pub fn echo_context() -> Self {
        Self::new(Script::EchoContext)
    }

    /// A model that always replies with `text`.
    pub fn reply(text: impl Into<String>) -> Self {
        Self::new(Script::Reply(ModelResponse::Text(text.into())))
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<ModelResponse> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        match &self.script {
            Script::EchoContext => {
                let context = prompt
                    .split_once("CONTEXT:")
                    .and_then(|(_, rest)| rest.split_once("QUESTION:"))
                    .map(|(context, _)| context.trim().to_string())
                    .unwrap_or_default();
                Ok(ModelResponse::Text(context))
            }
            Script::Reply(response) => Ok(response.clone()),
            Script::Fail(message) => {
                Err(RagError::Model { provider: "scripted".into(), message: message.clone() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalised() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed("The sky is blue").await.unwrap();
        let b = embedder.embed("the SKY is blue!").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn echo_model_returns_context_block() {
        let model = ScriptedModel::echo_context();
        let reply = model.generate("CONTEXT:\nsky is blue\n\nQUESTION:\ncolor?").await.unwrap();
        assert_eq!(reply.into_text(), "sky is blue");
        assert_eq!(model.prompts().len(), 1);
    }
}
