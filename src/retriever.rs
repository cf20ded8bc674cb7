//! Recuperación de los chunks más similares a una consulta.
//!
//! Flujo: embedding de la consulta → búsqueda en el índice → unión con los
//! metadatos → umbral de puntuación y filtros → truncado a `k`. Los filtros
//! sólo eliminan candidatos; nunca reordenan.

use std::sync::Arc;

use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::models::{Chunk, RetrievedChunk};
use crate::store::KnowledgeBase;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub chapter: Option<u32>,
}

impl SearchFilters {
    pub fn chapter(chapter: u32) -> Self {
        Self {
            chapter: Some(chapter),
        }
    }

    fn is_active(&self) -> bool {
        self.chapter.is_some()
    }

    fn accepts(&self, chunk: &Chunk) -> bool {
        match self.chapter {
            Some(wanted) => chunk.chapter == Some(wanted),
            None => true,
        }
    }
}

#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    knowledge: Arc<KnowledgeBase>,
    min_score: f32,
}

impl Retriever {
    pub fn new(embedder: Embedder, knowledge: Arc<KnowledgeBase>, min_score: f32) -> Self {
        Self {
            embedder,
            knowledge,
            min_score,
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Devuelve hasta `k` chunks ordenados por similitud. Una secuencia vacía
    /// significa "fuera de contexto", no un error.
    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
        filters: SearchFilters,
    ) -> Result<Vec<RetrievedChunk>> {
        if query_text.trim().is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        if k == 0 || self.knowledge.size() == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_one(query_text).await?;
        self.search_vector(&query_vector, k, filters)
    }

    /// Parte síncrona de `search`, a partir de un vector ya calculado.
    pub fn search_vector(
        &self,
        query_vector: &[f32],
        k: usize,
        filters: SearchFilters,
    ) -> Result<Vec<RetrievedChunk>> {
        // Con filtro activo se pide el índice completo para que el filtro
        // sólo pueda descartar candidatos.
        let candidates = if filters.is_active() {
            self.knowledge.size()
        } else {
            k
        };
        let hits = self.knowledge.index().search(query_vector, candidates)?;

        let mut results = Vec::with_capacity(k.min(hits.len()));
        for (vector_id, score) in hits {
            let chunk = self
                .knowledge
                .chunk(vector_id)
                .ok_or(RagError::ChunkMetadataMissing(vector_id))?;
            if score < self.min_score {
                // resultados ordenados: ninguno de los siguientes lo supera
                break;
            }
            if !filters.accepts(chunk) {
                continue;
            }
            results.push(RetrievedChunk {
                chunk: chunk.clone(),
                score,
                rank: results.len() + 1,
            });
            if results.len() == k {
                break;
            }
        }

        debug!(
            "Recuperados {} chunks (k={}, filtro={:?}, umbral={})",
            results.len(),
            k,
            filters.chapter,
            self.min_score
        );
        Ok(results)
    }

    /// Completa `results` hasta `k` con chunks del capítulo `chapter` que aún
    /// no aparezcan, en orden de inserción y con puntuación 0. Nunca elimina
    /// ni reordena los resultados por similitud.
    pub fn extend_with_chapter(&self, results: &mut Vec<RetrievedChunk>, chapter: u32, k: usize) {
        let before = results.len();
        for vector_id in self.knowledge.index().ids() {
            if results.len() >= k {
                break;
            }
            let Some(chunk) = self.knowledge.chunk(vector_id) else {
                continue;
            };
            if chunk.chapter != Some(chapter)
                || results.iter().any(|r| r.chunk.chunk_id == chunk.chunk_id)
            {
                continue;
            }
            results.push(RetrievedChunk {
                chunk: chunk.clone(),
                score: 0.0,
                rank: results.len() + 1,
            });
        }
        debug!(
            "Capítulo {} mencionado: {} chunks añadidos",
            chapter,
            results.len() - before
        );
    }
}
