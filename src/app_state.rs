use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::info;

use crate::{
    config::AppConfig,
    embedder::Embedder,
    llm::LlmManager,
    prompt::PromptBuilder,
    rag::AnswerOrchestrator,
    retriever::Retriever,
    store::KnowledgeBase,
};

/// Estado compartido del servidor. Todo es de sólo lectura salvo el canal
/// de apagado; la base de conocimiento se carga una única vez al arrancar.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<AnswerOrchestrator>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        orchestrator: AnswerOrchestrator,
    ) -> (Self, oneshot::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        };
        (state, shutdown_rx)
    }

    /// Carga el índice persistido y construye los backends reales.
    pub fn from_config(config: AppConfig) -> Result<(Self, oneshot::Receiver<()>)> {
        config.require_credentials(true)?;

        let knowledge = KnowledgeBase::load(&config.index_path, &config.metadata_path)
            .with_context(|| {
                format!(
                    "No se pudo cargar el índice ({}). ¿Se ejecutó la ingesta?",
                    config.index_path.display()
                )
            })?;
        let llm = LlmManager::from_config(&config)?;
        info!(
            "Modelo principal: {} | respaldo: {}",
            llm.primary.name(),
            llm.fallback
                .as_ref()
                .map(|f| f.name().to_string())
                .unwrap_or_else(|| "desactivado".to_string())
        );

        let retriever = Retriever::new(
            Embedder::new(llm.embedding.clone(), config.embed_batch_size),
            Arc::new(knowledge),
            config.min_score,
        );
        let orchestrator = AnswerOrchestrator::new(
            retriever,
            PromptBuilder::new(config.max_context_chars),
            llm.primary,
            llm.fallback,
            config.top_k,
        );
        Ok(Self::new(config, orchestrator))
    }
}
