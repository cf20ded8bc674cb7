//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//!
//! Expone dos costuras: `EmbeddingBackend` (en `embedder`) y `ChatBackend`.
//! Los errores de los proveedores se reducen a `BackendError`, y
//! `classify` decide de forma explícita si son de capacidad (se puede
//! probar el respaldo) o fatales.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AppConfig, ChatModelConfig, LlmProvider};
use crate::embedder::EmbeddingBackend;
use crate::error::RagError;
use crate::prompt::Prompt;

/// Error de un backend remoto, con el código HTTP cuando se conoce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{backend}: {message}")]
pub struct BackendError {
    pub backend: String,
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            status,
            message: message.into(),
        }
    }

    /// Construye el error a partir del mensaje del proveedor, extrayendo el
    /// código HTTP si aparece en él.
    pub fn from_message(backend: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let status = extract_status(&message);
        Self::new(backend, status, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Saturación o límite de peticiones: se permite el respaldo.
    Capacity,
    /// Autenticación, petición mal formada, etc.: no se reintenta.
    Fatal,
}

const CAPACITY_MARKERS: &[&str] = &[
    "capacity",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "overloaded",
];

/// Clasifica un error de backend. Sólo `Capacity` activa el respaldo.
///
/// Un código HTTP conocido decide por sí solo; el texto del mensaje sólo
/// se consulta cuando no hay código.
pub fn classify(err: &BackendError) -> ErrorClass {
    match err.status {
        Some(429) | Some(503) => return ErrorClass::Capacity,
        Some(_) => return ErrorClass::Fatal,
        None => {}
    }
    let message = err.message.to_lowercase();
    if CAPACITY_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorClass::Capacity
    } else {
        ErrorClass::Fatal
    }
}

/// Primer número de tres cifras aislado en el rango 400..=599.
fn extract_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (400..=599).contains(code))
}

/// Modelo de chat remoto.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Identificador legible, p. ej. `mistral:mistral-large-latest`.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> std::result::Result<String, BackendError>;
}

/// Backend de chat respaldado por los clientes de Rig.
#[derive(Debug, Clone)]
pub struct RigChatBackend {
    config: ChatModelConfig,
    name: String,
}

impl RigChatBackend {
    pub fn new(config: ChatModelConfig) -> Self {
        let name = format!("{}:{}", provider_label(config.provider), config.model);
        Self { config, name }
    }
}

#[async_trait]
impl ChatBackend for RigChatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &Prompt) -> std::result::Result<String, BackendError> {
        use rig::client::{CompletionClient as _, ProviderClient as _};
        use rig::completion::Prompt as _;
        use rig::providers::{groq, mistral, openai};

        let model = self.config.model.as_str();
        let user_text = prompt.user_text.as_str();

        let result = match self.config.provider {
            LlmProvider::Mistral => {
                let agent = mistral::Client::from_env()
                    .agent(model)
                    .preamble(&prompt.system_text)
                    .build();
                agent.prompt(user_text).await
            }
            LlmProvider::Groq => {
                let agent = groq::Client::from_env()
                    .agent(model)
                    .preamble(&prompt.system_text)
                    .build();
                agent.prompt(user_text).await
            }
            LlmProvider::OpenAI => {
                let agent = openai::Client::from_env()
                    .agent(model)
                    .preamble(&prompt.system_text)
                    .build();
                agent.prompt(user_text).await
            }
        };

        result
            .map(|answer| answer.trim().to_string())
            .map_err(|e| BackendError::from_message(self.name.clone(), e.to_string()))
    }
}

/// Backend de embeddings respaldado por Rig (Mistral u OpenAI).
#[derive(Debug, Clone)]
pub struct RigEmbeddingBackend {
    provider: LlmProvider,
    model: String,
}

impl RigEmbeddingBackend {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for RigEmbeddingBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
        use rig::client::{EmbeddingsClient as _, ProviderClient as _};
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::{mistral, openai};

        let result = match self.provider {
            LlmProvider::Mistral => {
                let model = mistral::Client::from_env().embedding_model(&self.model);
                model.embed_texts(texts.to_vec()).await
            }
            LlmProvider::OpenAI => {
                let model = openai::Client::from_env().embedding_model(&self.model);
                model.embed_texts(texts.to_vec()).await
            }
            LlmProvider::Groq => {
                return Err(RagError::embedding(
                    "Groq no ofrece modelos de embeddings",
                    false,
                ))
            }
        };

        let embeddings = result.map_err(|e| {
            let err = BackendError::from_message(self.model.clone(), e.to_string());
            let transient = classify(&err) == ErrorClass::Capacity;
            RagError::embedding(err.to_string(), transient)
        })?;

        Ok(embeddings
            .into_iter()
            .map(|emb| emb.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

fn provider_label(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Mistral => "mistral",
        LlmProvider::Groq => "groq",
        LlmProvider::OpenAI => "openai",
    }
}

/// Gestor de LLMs y embeddings: construye los backends una vez al arrancar.
#[derive(Clone)]
pub struct LlmManager {
    pub embedding: Arc<dyn EmbeddingBackend>,
    pub primary: Arc<dyn ChatBackend>,
    pub fallback: Option<Arc<dyn ChatBackend>>,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if !cfg.primary.provider.has_credentials() {
            return Err(anyhow!(
                "Falta {} para el modelo principal",
                cfg.primary.provider.api_key_var()
            ));
        }
        Ok(Self {
            embedding: Self::embedding_from_config(cfg)?,
            primary: Arc::new(RigChatBackend::new(cfg.primary.clone())),
            fallback: cfg
                .fallback
                .clone()
                .map(|fb| Arc::new(RigChatBackend::new(fb)) as Arc<dyn ChatBackend>),
        })
    }

    /// Sólo el backend de embeddings (lo que necesita la ingesta).
    pub fn embedding_from_config(cfg: &AppConfig) -> Result<Arc<dyn EmbeddingBackend>> {
        if !cfg.embedding_provider.has_credentials() {
            return Err(anyhow!(
                "Falta {} para el modelo de embeddings",
                cfg.embedding_provider.api_key_var()
            ));
        }
        Ok(Arc::new(RigEmbeddingBackend::new(
            cfg.embedding_provider,
            cfg.embedding_model.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_capacity_errors_allow_fallback() {
        let cases = [
            BackendError::new("mistral", Some(429), "Too Many Requests"),
            BackendError::new("mistral", Some(503), "Service unavailable"),
            BackendError::from_message(
                "mistral",
                "ProviderError: Service tier capacity exceeded for this model.",
            ),
            BackendError::from_message("groq", "HTTP status 429: rate limit reached for model"),
        ];
        for err in &cases {
            assert_eq!(classify(err), ErrorClass::Capacity, "{err}");
        }
    }

    #[test]
    fn auth_and_request_errors_are_fatal() {
        let cases = [
            BackendError::from_message("mistral", "HTTP 401 Unauthorized: invalid api key"),
            BackendError::new("mistral", Some(400), "Invalid model: mistral-large-2411"),
            BackendError::from_message("groq", "JsonError: expected value at line 1"),
            BackendError::new(
                "mistral",
                Some(400),
                "Prompt too long: exceeds model context capacity",
            ),
            BackendError::from_message("groq", "HTTP 401: invalid api key for rate_limit tier"),
        ];
        for err in &cases {
            assert_eq!(classify(err), ErrorClass::Fatal, "{err}");
        }
    }

    #[test]
    fn extracts_only_plausible_http_status_codes() {
        assert_eq!(extract_status("status 429 Too Many Requests"), Some(429));
        assert_eq!(extract_status("error (401): unauthorized"), Some(401));
        assert_eq!(extract_status("model mistral-large-2411 failed"), None);
        assert_eq!(extract_status("took 250 ms"), None);
        assert_eq!(extract_status("llama-3.3-70b"), None);
    }
}
