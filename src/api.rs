use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{app_state::AppState, error::RagError, models::RagResponse, prompt::Mode};

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    chapter: Option<u32>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ask", post(ask_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<RagResponse>, ApiError> {
    // El modo se valida antes de cualquier llamada de red.
    let mode = match payload.mode.as_deref() {
        Some(raw) => raw.parse::<Mode>().map_err(error_response)?,
        None => Mode::default(),
    };

    state
        .orchestrator
        .answer(&payload.question, mode, payload.chapter)
        .await
        .map(Json)
        .map_err(error_response)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let orchestrator = &state.orchestrator;
    Json(json!({
        "status": "ok",
        "vectors": orchestrator.retriever().knowledge().size(),
        "embedding_model": orchestrator.retriever().embedder().model_name(),
        "primary_model": orchestrator.primary_name(),
        "fallback_model": orchestrator.fallback_name(),
        "top_k": state.config.top_k,
    }))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Ok(mut guard) = state.shutdown_sender.lock() {
        if let Some(sender) = guard.take() {
            let _ = sender.send(());
        }
    }
    StatusCode::OK
}

fn error_response(err: RagError) -> ApiError {
    let status = match &err {
        RagError::UnknownMode(_) | RagError::EmptyQuestion => StatusCode::BAD_REQUEST,
        RagError::GenerationFailed { .. } | RagError::EmbeddingBackendError { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::BAD_REQUEST {
        return (status, Json(json!({ "error": err.to_string() })));
    }

    error!("Error al procesar la consulta RAG: {err}");
    (
        status,
        Json(json!({
            "error": "Impossible d'obtenir une réponse pour le moment. Réessaie dans quelques instants."
        })),
    )
}
