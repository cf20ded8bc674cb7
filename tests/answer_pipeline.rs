//! Flujo completo: ingesta → persistencia → carga → consulta, con backends
//! falsos en lugar de los servicios remotos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use rag_campus::api::create_router;
use rag_campus::app_state::AppState;
use rag_campus::chunker::ChunkConfig;
use rag_campus::config::AppConfig;
use rag_campus::embedder::{Embedder, EmbeddingBackend};
use rag_campus::ingest::Ingestor;
use rag_campus::llm::{BackendError, ChatBackend};
use rag_campus::prompt::{Prompt, PromptBuilder, OUT_OF_CONTEXT_ANSWER};
use rag_campus::retriever::{Retriever, SearchFilters};
use rag_campus::store::KnowledgeBase;
use rag_campus::{AnswerOrchestrator, Backend, Document, Mode, RagError};

const VOCAB: [&str; 5] = ["pile", "file", "arbre", "tri", "graphe"];

/// Una dimensión por palabra clave del vocabulario.
struct KeywordEmbedding;

#[async_trait]
impl EmbeddingBackend for KeywordEmbedding {
    fn model_name(&self) -> &str {
        "keyword-embed"
    }

    async fn embed_batch(&self, texts: &[String]) -> rag_campus::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCAB
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect()
            })
            .collect())
    }
}

struct ScriptedChat {
    name: &'static str,
    outcome: Result<String, BackendError>,
    calls: AtomicUsize,
}

impl ScriptedChat {
    fn new(name: &'static str, outcome: Result<String, BackendError>) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

fn course_without_stacks() -> Vec<Document> {
    vec![
        Document::from_pages(
            "chapitre_01_files",
            Some(1),
            vec![
                (1, "Une file suit la discipline FIFO. On enfile en queue.".to_string()),
                (2, "On défile en tête de la file.".to_string()),
            ],
        ),
        Document::from_pages(
            "chapitre_04_arbres",
            Some(4),
            vec![(1, "Un arbre binaire de recherche ordonne ses clés.".to_string())],
        ),
    ]
}

fn course_with_stacks() -> Vec<Document> {
    let mut docs = course_without_stacks();
    docs.push(
        Document::from_pages(
            "chapitre_02_piles",
            Some(2),
            vec![(3, "Une pile est une structure LIFO : empiler, dépiler.".to_string())],
        )
        .with_source("chapitre_02_piles.pdf"),
    );
    docs
}

async fn build_knowledge(docs: &[Document]) -> KnowledgeBase {
    let embedder = Embedder::new(Arc::new(KeywordEmbedding), 4);
    let ingestor = Ingestor::new(embedder, ChunkConfig::new(380, 60).unwrap());
    let (kb, _) = ingestor.ingest_documents(docs).await.unwrap();
    kb
}

fn orchestrator(
    kb: KnowledgeBase,
    primary: Arc<ScriptedChat>,
    fallback: Option<Arc<ScriptedChat>>,
) -> AnswerOrchestrator {
    let retriever = Retriever::new(
        Embedder::new(Arc::new(KeywordEmbedding), 4),
        Arc::new(kb),
        0.5,
    );
    AnswerOrchestrator::new(
        retriever,
        PromptBuilder::new(2000),
        primary,
        fallback.map(|f| f as Arc<dyn ChatBackend>),
        5,
    )
}

#[tokio::test]
async fn question_about_stacks_without_stack_material_is_out_of_context() {
    let kb = build_knowledge(&course_without_stacks()).await;
    let primary = ScriptedChat::new("mistral", Ok("jamais".into()));
    let fallback = ScriptedChat::new("groq", Ok("jamais".into()));
    let rag = orchestrator(kb, primary.clone(), Some(fallback.clone()));

    let response = rag
        .answer("Qu'est-ce qu'une pile ?", Mode::Standard, None)
        .await
        .unwrap();

    assert_eq!(response.backend, Backend::OutOfContext);
    assert!(response.citations.is_empty());
    assert_eq!(response.answer, OUT_OF_CONTEXT_ANSWER);
    assert_eq!(primary.calls() + fallback.calls(), 0);
}

#[tokio::test]
async fn persisted_index_answers_like_the_fresh_one() {
    let kb = build_knowledge(&course_with_stacks()).await;
    let dir = tempfile::tempdir().unwrap();
    let index_path = dir.path().join("vector_store.idx");
    let metadata_path = dir.path().join("chunks.jsonl");
    kb.save(&index_path, &metadata_path).unwrap();
    let loaded = KnowledgeBase::load(&index_path, &metadata_path).unwrap();

    let fresh = Retriever::new(Embedder::new(Arc::new(KeywordEmbedding), 4), Arc::new(kb), 0.0);
    let reloaded = Retriever::new(Embedder::new(Arc::new(KeywordEmbedding), 4), Arc::new(loaded), 0.0);
    for question in ["une pile", "la file et l'arbre", "tri d'un graphe"] {
        let a = fresh.search(question, 10, SearchFilters::default()).await.unwrap();
        let b = reloaded.search(question, 10, SearchFilters::default()).await.unwrap();
        assert_eq!(a, b);
    }
}

#[tokio::test]
async fn capacity_error_falls_back_end_to_end() {
    let kb = build_knowledge(&course_with_stacks()).await;
    let primary = ScriptedChat::new(
        "mistral",
        Err(BackendError::from_message("mistral", "HTTP 429: Service tier capacity exceeded")),
    );
    let fallback = ScriptedChat::new("groq", Ok("Une pile est LIFO [1].".into()));
    let rag = orchestrator(kb, primary.clone(), Some(fallback.clone()));

    let response = rag
        .answer("Qu'est-ce qu'une pile ?", Mode::Revision, None)
        .await
        .unwrap();

    assert_eq!(response.backend, Backend::Fallback);
    assert!(response.latency_ms >= 0.0);
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].chunk.chapter, Some(2));
    assert_eq!(response.citations[0].chunk.pages.first, 3);
    assert_eq!(
        response.citations[0].chunk.source_filename.as_deref(),
        Some("chapitre_02_piles.pdf")
    );
    assert_eq!((primary.calls(), fallback.calls()), (1, 1));
}

#[tokio::test]
async fn auth_error_is_not_masked_by_the_fallback() {
    let kb = build_knowledge(&course_with_stacks()).await;
    let primary = ScriptedChat::new(
        "mistral",
        Err(BackendError::from_message("mistral", "401 Unauthorized")),
    );
    let fallback = ScriptedChat::new("groq", Ok("jamais".into()));
    let rag = orchestrator(kb, primary, Some(fallback.clone()));

    let err = rag
        .answer("Qu'est-ce qu'une pile ?", Mode::Standard, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::GenerationFailed { .. }));
    assert_eq!(fallback.calls(), 0);
}

fn test_config() -> AppConfig {
    AppConfig {
        server_addr: "127.0.0.1:0".into(),
        embedding_provider: rag_campus::config::LlmProvider::Mistral,
        embedding_model: "keyword-embed".into(),
        primary: rag_campus::config::ChatModelConfig {
            provider: rag_campus::config::LlmProvider::Mistral,
            model: "mistral".into(),
        },
        fallback: None,
        chunking: ChunkConfig::new(380, 60).unwrap(),
        top_k: 5,
        min_score: 0.5,
        max_context_chars: 2000,
        embed_batch_size: 4,
        index_path: "unused.idx".into(),
        metadata_path: "unused.jsonl".into(),
    }
}

async fn post_ask(state: AppState, body: &str) -> (StatusCode, serde_json::Value) {
    let response = create_router(state)
        .oneshot(
            Request::post("/api/ask")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn http_ask_returns_the_response_contract() {
    let kb = build_knowledge(&course_with_stacks()).await;
    let primary = ScriptedChat::new("mistral", Ok("Une pile est LIFO [1].".into()));
    let (state, _rx) = AppState::new(test_config(), orchestrator(kb, primary, None));

    let (status, body) = post_ask(
        state,
        r#"{"question": "Qu'est-ce qu'une pile ?", "mode": "beginner"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "primary");
    assert_eq!(body["mode"], "beginner");
    assert_eq!(body["answer"], "Une pile est LIFO [1].");
    assert_eq!(body["citations"][0]["chapter"], 2);
    assert_eq!(body["citations"][0]["rank"], 1);
}

#[tokio::test]
async fn http_unknown_mode_is_rejected_before_any_backend_call() {
    let kb = build_knowledge(&course_with_stacks()).await;
    let primary = ScriptedChat::new("mistral", Ok("jamais".into()));
    let (state, _rx) = AppState::new(test_config(), orchestrator(kb, primary.clone(), None));

    let (status, body) = post_ask(state, r#"{"question": "pile ?", "mode": "poetry"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("poetry"));
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn http_generation_failure_is_a_generic_503() {
    let kb = build_knowledge(&course_with_stacks()).await;
    let primary = ScriptedChat::new(
        "mistral",
        Err(BackendError::new("mistral", Some(401), "invalid api key")),
    );
    let (state, _rx) = AppState::new(test_config(), orchestrator(kb, primary, None));

    let (status, body) = post_ask(state, r#"{"question": "Qu'est-ce qu'une pile ?"}"#).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!body["error"].as_str().unwrap().contains("api key"));
}
