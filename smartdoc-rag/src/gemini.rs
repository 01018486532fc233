//! Gemini REST backend for embeddings and generation.
//!
//! This module is only available when the `gemini` feature is enabled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::model::{GenerativeModel, ModelLoader, ModelResponse};

/// The public Generative Language API endpoint.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Output size of `text-embedding-004`.
const DEFAULT_DIMENSIONS: usize = 768;

/// Most requests `batchEmbedContents` accepts in one call.
const MAX_EMBED_BATCH: usize = 100;

/// Upper bound on any single HTTP request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Page size requested when listing models.
const MODELS_PAGE_SIZE: u32 = 100;

const PROVIDER: &str = "Gemini";

/// Shared HTTP client and credentials for the Gemini API.
///
/// Cheap to clone; clones share the underlying connection pool.
///
/// # Example
///
/// ```rust,ignore
/// use smartdoc_rag::gemini::{GeminiClient, GeminiEmbeddingProvider};
///
/// let client = GeminiClient::from_env()?;
/// let embedder = GeminiEmbeddingProvider::new(client.clone(), "text-embedding-004");
/// ```
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a client with the given API key and a 60 second request timeout.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::Config("Gemini API key must not be empty".into()));
        }
        Ok(Self {
            http: http_client(DEFAULT_REQUEST_TIMEOUT)?,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
        })
    }

    /// Replace the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = http_client(timeout)?;
        Ok(self)
    }

    /// Create a client from `GOOGLE_API_KEY`, falling back to `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                RagError::Config("GOOGLE_API_KEY or GEMINI_API_KEY must be set".into())
            })?;
        Self::new(api_key)
    }

    /// Point the client at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{method}", self.base_url, qualified(model))
    }

    /// List the models available to this key, following pagination.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header("x-goog-api-key", &self.api_key)
                .query(&[("pageSize", MODELS_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListModelsResponse = read_response(request).await.map_err(|message| {
                error!(provider = PROVIDER, error = %message, "listing models failed");
                RagError::Model { provider: PROVIDER.into(), message }
            })?;

            models.extend(page.models);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(provider = PROVIDER, count = models.len(), "listed models");
        Ok(models)
    }

    async fn post<B, R>(&self, url: &str, body: &B) -> std::result::Result<R, String>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.http.post(url).header("x-goog-api-key", &self.api_key).json(body);
        read_response(request).await
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::Config(format!("failed to build HTTP client: {e}")))
}

async fn read_response<R: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> std::result::Result<R, String> {
    let response = request.send().await.map_err(|e| format!("request failed: {e}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(format!("API returned {status}: {detail}"));
    }

    response.json().await.map_err(|e| format!("failed to parse response: {e}"))
}

/// `text-embedding-004` → `models/text-embedding-004`; already qualified names pass through.
fn qualified(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'a str>, text: &'a str) -> Self {
        Self { role, parts: vec![TextPart { text }] }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

/// A model entry from the `models` listing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Qualified name, e.g. `models/gemini-2.5-flash`.
    pub name: String,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,
    /// API methods the model supports, e.g. `generateContent`.
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

impl ModelInfo {
    /// Whether the model can answer questions through `generateContent`.
    pub fn supports_generation(&self) -> bool {
        self.supported_generation_methods.iter().any(|m| m == "generateContent")
    }

    /// Whether the model can produce embeddings through `embedContent`.
    pub fn supports_embedding(&self) -> bool {
        self.supported_generation_methods.iter().any(|m| m == "embedContent")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── EmbeddingProvider ──────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the Gemini `embedContent` API.
pub struct GeminiEmbeddingProvider {
    client: GeminiClient,
    model: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `model` (e.g. `text-embedding-004`).
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        }
    }

    /// Ask the API to truncate embeddings to `dims`.
    ///
    /// This also updates the value returned by [`dimensions()`](EmbeddingProvider::dimensions).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    fn request<'a>(&self, text: &'a str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: qualified(&self.model),
            content: Content::text(None, text),
            output_dimensionality: self.request_dimensions,
        }
    }

    /// One request body per API call, each at most [`MAX_EMBED_BATCH`] texts.
    fn batch_requests<'a>(&self, texts: &[&'a str]) -> Vec<BatchEmbedRequest<'a>> {
        texts
            .chunks(MAX_EMBED_BATCH)
            .map(|batch| BatchEmbedRequest {
                requests: batch.iter().map(|t| self.request(t)).collect(),
            })
            .collect()
    }

    fn failure(&self, message: String) -> RagError {
        error!(provider = PROVIDER, model = %self.model, error = %message, "embedding failed");
        RagError::Embedding { provider: PROVIDER.into(), message }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let url = self.client.endpoint(&self.model, "embedContent");
        let response: EmbedContentResponse =
            self.client.post(&url, &self.request(text)).await.map_err(|m| self.failure(m))?;
        Ok(response.embedding.values)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.client.endpoint(&self.model, "batchEmbedContents");
        let mut embeddings = Vec::with_capacity(texts.len());

        for body in self.batch_requests(texts) {
            let expected = body.requests.len();
            debug!(
                provider = PROVIDER,
                batch_size = expected,
                model = %self.model,
                "embedding batch"
            );

            let response: BatchEmbedResponse =
                self.client.post(&url, &body).await.map_err(|m| self.failure(m))?;
            if response.embeddings.len() != expected {
                return Err(self.failure(format!(
                    "expected {expected} embeddings, API returned {}",
                    response.embeddings.len()
                )));
            }
            embeddings.extend(response.embeddings.into_iter().map(|e| e.values));
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ── GenerativeModel ────────────────────────────────────────────────

/// A [`GenerativeModel`] backed by the Gemini `generateContent` API.
pub struct GeminiModel {
    client: GeminiClient,
    model: String,
}

impl GeminiModel {
    /// Create a model handle for `model` (e.g. `gemini-2.5-flash`).
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<ModelResponse> {
        debug!(provider = PROVIDER, model = %self.model, prompt_len = prompt.len(), "generating");

        let body = GenerateContentRequest { contents: vec![Content::text(Some("user"), prompt)] };
        let url = self.client.endpoint(&self.model, "generateContent");
        let response: Value = self.client.post(&url, &body).await.map_err(|message| {
            error!(provider = PROVIDER, model = %self.model, error = %message, "generation failed");
            RagError::Model { provider: PROVIDER.into(), message }
        })?;
        Ok(ModelResponse::from_json(response))
    }
}

/// A [`ModelLoader`] that creates [`GeminiModel`] handles on demand.
#[derive(Clone)]
pub struct GeminiModelLoader {
    client: GeminiClient,
}

impl GeminiModelLoader {
    /// Create a loader sharing `client`.
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelLoader for GeminiModelLoader {
    async fn load(&self, model_name: &str) -> Result<Arc<dyn GenerativeModel>> {
        Ok(Arc::new(GeminiModel::new(self.client.clone(), model_name)))
    }
}
