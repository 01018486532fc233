//! Generative model boundary.
//!
//! Providers return loosely shaped payloads: a bare text field, a list of
//! content parts that are either strings or `{ "text": ... }` records, or
//! something else entirely. [`ModelResponse`] resolves that shape once, at the
//! boundary, so the rest of the crate only ever calls
//! [`into_text`](ModelResponse::into_text).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One element of a multi-part model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// A bare string part.
    Plain(String),
    /// A record carrying a `text` field.
    Text { text: String },
    /// Any other part (inline data, function calls, ...). Contributes no text.
    Other(Value),
}

impl ContentPart {
    /// Classify a JSON part.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Plain(s),
            Value::Object(_) => {
                match value.get("text").and_then(Value::as_str).map(str::to_string) {
                    Some(text) => Self::Text { text },
                    None => Self::Other(value),
                }
            }
            other => Self::Other(other),
        }
    }

    /// The text this part contributes, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Plain(s) | Self::Text { text: s } => Some(s.as_str()),
            Self::Other(_) => None,
        }
    }

    fn into_json(self) -> Value {
        match self {
            Self::Plain(s) => Value::String(s),
            Self::Text { text } => serde_json::json!({ "text": text }),
            Self::Other(value) => value,
        }
    }
}

/// A generative model response, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// The provider exposed the answer as a single text field.
    Text(String),
    /// The provider returned a list of content parts.
    Parts(Vec<ContentPart>),
    /// Anything else; rendered verbatim as a last resort.
    Raw(Value),
}

impl ModelResponse {
    /// Classify a provider JSON payload.
    ///
    /// Resolution order: a top-level JSON string, a top-level `text` string,
    /// `candidates[0].content.parts`, `candidates[0].content` as a list, a
    /// top-level `parts` list. Everything else becomes [`ModelResponse::Raw`].
    pub fn from_json(value: Value) -> Self {
        if let Some(text) = value.as_str() {
            return Self::Text(text.to_string());
        }
        if let Some(text) = value.get("text").and_then(Value::as_str) {
            return Self::Text(text.to_string());
        }

        let candidate_parts = value
            .get("candidates")
            .and_then(|candidates| candidates.get(0))
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts").unwrap_or(content).as_array());

        match candidate_parts.or_else(|| value.get("parts").and_then(Value::as_array)) {
            Some(parts) => {
                Self::Parts(parts.iter().cloned().map(ContentPart::from_json).collect())
            }
            None => Self::Raw(value),
        }
    }

    /// Extract plain text.
    ///
    /// Multi-part responses are concatenated without separators. If no part
    /// carries text, or the response is [`Raw`](ModelResponse::Raw), the JSON
    /// rendering of the response is returned instead.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Parts(parts) => {
                if parts.iter().any(|part| part.text().is_some()) {
                    parts.iter().filter_map(ContentPart::text).collect()
                } else {
                    Value::Array(parts.into_iter().map(ContentPart::into_json).collect())
                        .to_string()
                }
            }
            Self::Raw(Value::String(text)) => text,
            Self::Raw(value) => value.to_string(),
        }
    }
}

impl From<String> for ModelResponse {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ModelResponse {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// A generative model that turns a prompt into a response.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Run the model on a single prompt.
    async fn generate(&self, prompt: &str) -> Result<ModelResponse>;
}

/// Loads a [`GenerativeModel`] by identifier on first use.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Load (or connect to) the named model.
    async fn load(&self, model_name: &str) -> Result<Arc<dyn GenerativeModel>>;
}

/// A [`ModelLoader`] that hands out an already constructed model.
#[derive(Clone)]
pub struct StaticModelLoader {
    model: Arc<dyn GenerativeModel>,
}

impl StaticModelLoader {
    /// Wrap an existing model.
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ModelLoader for StaticModelLoader {
    async fn load(&self, _model_name: &str) -> Result<Arc<dyn GenerativeModel>> {
        Ok(Arc::clone(&self.model))
    }
}
