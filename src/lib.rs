//! Núcleo RAG para cursos en PDF: troceado, embeddings, índice vectorial,
//! recuperación, prompts por modo y respuesta con modelo de respaldo.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod rag;
pub mod retriever;
pub mod store;
pub mod vector_index;

pub use error::{RagError, Result};
pub use models::{Backend, Chunk, Document, RagResponse, RetrievedChunk};
pub use prompt::Mode;
pub use rag::AnswerOrchestrator;
