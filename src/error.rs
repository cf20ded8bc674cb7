//! Taxonomía de errores del núcleo RAG.
//!
//! Los componentes del núcleo devuelven `RagError`; el cableado del proceso
//! (`main`, configuración, recorrido de directorios) sigue usando `anyhow`.

use thiserror::Error;

use crate::llm::BackendError;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Configuración de chunking inválida: chunk_size={chunk_size}, overlap={overlap}")]
    InvalidChunkConfig { chunk_size: usize, overlap: usize },

    #[error("Error del backend de embeddings: {message}")]
    EmbeddingBackendError { message: String, transient: bool },

    #[error("Dimensión incorrecta: se esperaba {expected}, se recibió {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector_id duplicado: {0}")]
    DuplicateVectorId(u64),

    #[error("No existe chunk asociado al vector_id {0} (índice y metadatos desincronizados)")]
    ChunkMetadataMissing(u64),

    #[error("Modo de respuesta desconocido: '{0}'")]
    UnknownMode(String),

    #[error("La pregunta está vacía")]
    EmptyQuestion,

    #[error("Fallo en la generación de la respuesta: {cause}")]
    GenerationFailed { cause: BackendError },

    #[error("Índice vectorial corrupto: {0}")]
    CorruptIndex(String),

    #[error("Consulta cancelada")]
    Cancelled,

    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn embedding(message: impl Into<String>, transient: bool) -> Self {
        Self::EmbeddingBackendError {
            message: message.into(),
            transient,
        }
    }

    /// Indica si el llamante puede reintentar la operación con backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingBackendError {
                transient: true,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
