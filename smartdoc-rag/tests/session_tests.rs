//! End-to-end session behaviour with offline embedders and scripted models.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use smartdoc_rag::testing::{FailingEmbedder, HashEmbedder, ScriptedModel};
use smartdoc_rag::{
    Answer, EmbeddingProvider, GenerativeModel, ModelLoader, ModelResponse, RagError,
    RemovalPolicy, Session, SessionStatus, SmartDocConfig, UNRELATED_ANSWER, UploadError,
};

fn config(root: &Path) -> SmartDocConfig {
    SmartDocConfig::builder()
        .persist_location(root.join("vectorstore"))
        .upload_dir(root.join("uploaded_docs"))
        .removal(RemovalPolicy::immediate(3))
        .build()
        .unwrap()
}

fn session_with(
    root: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn GenerativeModel>,
) -> Session {
    Session::builder()
        .config(config(root))
        .embedding_provider(embedder)
        .model(model)
        .build()
        .unwrap()
}

fn echo_session(root: &Path) -> Session {
    session_with(root, Arc::new(HashEmbedder::new(32)), Arc::new(ScriptedModel::echo_context()))
}

#[tokio::test]
async fn scenario_a_answers_from_uploaded_text() {
    let temp = tempfile::tempdir().unwrap();
    let session = echo_session(temp.path());

    let report =
        session.upload("The sky is blue. Grass is green.", Some("facts.txt")).await.unwrap();
    assert_eq!(report.chunks_added, 1);
    assert!(!report.recreated);
    assert_eq!(session.status().await, SessionStatus::Ready);

    let answer = session.ask("What color is the sky?", 5).await;
    assert!(answer.grounded);
    assert!(answer.text.contains("blue"));
    assert!(answer.text.contains("Sources:\n1. facts.txt (chunk 1)"));
    assert_eq!(answer.sources.len(), 1);
    assert!(answer.confidence > 0.0 && answer.confidence <= 1.0);
}

#[tokio::test]
async fn scenario_b_ask_before_upload_is_unknown() {
    let temp = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::echo_context());
    let session = session_with(temp.path(), Arc::new(HashEmbedder::new(32)), model.clone());

    let answer = session.ask("anything?", 5).await;
    assert_eq!(answer.text, "I don't know");
    assert!(answer.sources.is_empty());
    assert_eq!(answer.confidence, 0.0);
    assert!(!answer.grounded);
    assert!(model.prompts().is_empty());
    assert_eq!(session.status().await, SessionStatus::NoDocument);
}

#[tokio::test]
async fn scenario_c_uploads_accumulate() {
    let temp = tempfile::tempdir().unwrap();
    let session = echo_session(temp.path());

    session.upload("Owls hunt at night.", Some("owls.txt")).await.unwrap();
    let second = session.upload("Bees make honey in hives.", Some("bees.txt")).await.unwrap();
    assert_eq!(second.total_records, 2);
    assert_eq!(session.document_count().await, 2);

    let contexts = session.retrieve_contexts("Where do bees make honey?", 5).await;
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0].metadata.source.as_deref(), Some("bees.txt (chunk 1)"));
    assert_eq!(contexts[1].metadata.source.as_deref(), Some("owls.txt (chunk 1)"));
}

#[tokio::test]
async fn scenario_d_dimension_change_rebuilds_index() {
    let temp = tempfile::tempdir().unwrap();
    let session = echo_session(temp.path());

    session.upload("Owls hunt at night.", Some("owls.txt")).await.unwrap();
    session.replace_embedding_provider(Arc::new(HashEmbedder::new(48))).await;

    let report = session.upload("Bees make honey in hives.", Some("bees.txt")).await.unwrap();
    assert!(report.recreated);
    assert_eq!(report.total_records, 1);

    let contexts = session.retrieve_contexts("owls", 5).await;
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].text, "Bees make honey in hives.");
    assert_eq!(contexts[0].embedding.len(), 48);
}

#[tokio::test]
async fn scenario_e_reset_without_upload_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    let session = echo_session(temp.path());
    session.reset().await.unwrap();
    session.reset().await.unwrap();
    assert_eq!(session.status().await, SessionStatus::NoDocument);
}

#[tokio::test]
async fn reset_then_ask_is_unknown_and_upload_starts_fresh() {
    let temp = tempfile::tempdir().unwrap();
    let session = echo_session(temp.path());

    session.upload("Owls hunt at night.", None).await.unwrap();
    session.reset().await.unwrap();
    assert!(session.ask("owls?", 3).await.is_unknown());

    let report = session.upload("Bees make honey.", None).await.unwrap();
    assert_eq!(report.total_records, 1);
}

#[tokio::test]
async fn long_document_splits_and_retrieves_the_relevant_chunk() {
    let temp = tempfile::tempdir().unwrap();
    let config = SmartDocConfig::builder()
        .persist_location(temp.path().join("vectorstore"))
        .upload_dir(temp.path().join("uploaded_docs"))
        .chunk_size(60)
        .chunk_overlap(10)
        .default_k(1)
        .build()
        .unwrap();
    let session = Session::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbedder::new(64)))
        .model(Arc::new(ScriptedModel::echo_context()))
        .build()
        .unwrap();

    let text = "Penguins live in Antarctica.\n\n\
                Camels cross deserts carrying water.\n\n\
                Salmon swim upstream to spawn.";
    let report = session.upload(text, Some("animals.txt")).await.unwrap();
    assert_eq!(report.chunks_added, 3);

    let answer = session.ask_default("Which animals cross deserts?").await;
    assert!(answer.text.starts_with("Camels cross deserts carrying water."));
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].source.as_deref(), Some("animals.txt (chunk 2)"));
}

#[tokio::test]
async fn sentinel_reply_is_reported_as_unrelated() {
    let temp = tempfile::tempdir().unwrap();
    let session = session_with(
        temp.path(),
        Arc::new(HashEmbedder::new(32)),
        Arc::new(ScriptedModel::reply("I don't know.")),
    );
    session.upload("Owls hunt at night.", None).await.unwrap();

    let answer = session.ask("What is the capital of France?", 5).await;
    assert_eq!(answer.text, UNRELATED_ANSWER);
    assert!(answer.sources.is_empty());
    assert!(!answer.grounded);
}

#[tokio::test]
async fn records_without_scores_give_half_confidence() {
    let temp = tempfile::tempdir().unwrap();
    let config = SmartDocConfig::builder()
        .persist_location(temp.path().join("vectorstore"))
        .attach_scores(false)
        .build()
        .unwrap();
    let session = Session::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbedder::new(32)))
        .model(Arc::new(ScriptedModel::reply("Owls.")))
        .build()
        .unwrap();
    session.upload("Owls hunt at night.", None).await.unwrap();

    let answer = session.ask("Who hunts at night?", 5).await;
    assert!(answer.grounded);
    assert_eq!(answer.confidence, 0.5);
    assert!(answer.text.ends_with("1. Unknown"));
}

#[tokio::test]
async fn embedding_failure_leaves_session_without_document() {
    let temp = tempfile::tempdir().unwrap();
    let session = session_with(
        temp.path(),
        Arc::new(FailingEmbedder),
        Arc::new(ScriptedModel::echo_context()),
    );

    let err = session.upload("Owls hunt at night.", None).await.unwrap_err();
    assert!(matches!(err, UploadError::EmbeddingFailure(RagError::Embedding { .. })));
    assert_eq!(session.status().await, SessionStatus::NoDocument);
    assert!(session.ask("owls?", 3).await.is_unknown());
}

#[tokio::test]
async fn failed_upload_keeps_existing_corpus() {
    let temp = tempfile::tempdir().unwrap();
    let session = echo_session(temp.path());
    session.upload("Owls hunt at night.", None).await.unwrap();

    assert!(matches!(session.upload(" \n ", None).await, Err(UploadError::EmptyText)));
    assert_eq!(session.document_count().await, 1);
}

struct SlowModel;

#[async_trait]
impl GenerativeModel for SlowModel {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, _prompt: &str) -> smartdoc_rag::Result<ModelResponse> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ModelResponse::from("too late"))
    }
}

#[tokio::test(start_paused = true)]
async fn model_timeout_produces_error_answer() {
    let temp = tempfile::tempdir().unwrap();
    let config = SmartDocConfig::builder()
        .persist_location(temp.path().join("vectorstore"))
        .model_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let session = Session::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbedder::new(16)))
        .model(Arc::new(SlowModel))
        .build()
        .unwrap();
    session.upload("Owls hunt at night.", None).await.unwrap();

    let answer = session.ask("owls?", 1).await;
    assert!(answer.text.starts_with("RAG pipeline error:"));
    assert!(answer.text.contains("timed out"));

    // State is untouched: the document is still there.
    assert_eq!(session.document_count().await, 1);
}

/// Embeds documents instantly but hangs on queries.
struct StalledQueryEmbedder(HashEmbedder);

#[async_trait]
impl EmbeddingProvider for StalledQueryEmbedder {
    async fn embed(&self, _text: &str) -> smartdoc_rag::Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![0.0; self.0.dimensions()])
    }

    async fn embed_batch(&self, texts: &[&str]) -> smartdoc_rag::Result<Vec<Vec<f32>>> {
        self.0.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.0.dimensions()
    }
}

#[tokio::test(start_paused = true)]
async fn retrieval_timeout_produces_error_answer() {
    let temp = tempfile::tempdir().unwrap();
    let config = SmartDocConfig::builder()
        .persist_location(temp.path().join("vectorstore"))
        .retrieval_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let model = Arc::new(ScriptedModel::echo_context());
    let session = Session::builder()
        .config(config)
        .embedding_provider(Arc::new(StalledQueryEmbedder(HashEmbedder::new(16))))
        .model(model.clone())
        .build()
        .unwrap();
    session.upload("Owls hunt at night.", None).await.unwrap();

    let answer = session.ask("owls?", 1).await;
    assert!(answer.text.starts_with("RAG pipeline error:"));
    assert!(answer.text.contains("retrieval timed out"));
    assert!(model.prompts().is_empty());

    assert!(session.retrieve_contexts("owls?", 1).await.is_empty());
    assert_eq!(session.document_count().await, 1);
}

struct BrokenLoader;

#[async_trait]
impl ModelLoader for BrokenLoader {
    async fn load(&self, model_name: &str) -> smartdoc_rag::Result<Arc<dyn GenerativeModel>> {
        let message = format!("{model_name} unavailable");
        Err(RagError::Model { provider: "test".into(), message })
    }
}

#[tokio::test]
async fn model_load_failure_produces_error_answer() {
    let temp = tempfile::tempdir().unwrap();
    let session = Session::builder()
        .config(config(temp.path()))
        .embedding_provider(Arc::new(HashEmbedder::new(16)))
        .model_loader(Arc::new(BrokenLoader))
        .build()
        .unwrap();
    session.upload("Owls hunt at night.", None).await.unwrap();

    let answer = session.ask("owls?", 1).await;
    assert!(answer.text.starts_with("RAG pipeline error:"));
    assert!(answer.text.contains("gemini-2.5-flash unavailable"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_asks_all_answer() {
    let temp = tempfile::tempdir().unwrap();
    let session = Arc::new(echo_session(temp.path()));
    session.upload("The sky is blue. Grass is green.", Some("facts.txt")).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let session = Arc::clone(&session);
            let question = format!("question {i} about the sky");
            tokio::spawn(async move { session.ask(&question, 3).await })
        })
        .collect();

    for handle in handles {
        let answer: Answer = handle.await.unwrap();
        assert!(answer.grounded);
        assert!(answer.text.contains("blue"));
    }
}
