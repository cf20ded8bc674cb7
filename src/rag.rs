//! Orquestación de una consulta RAG.
//!
//! Flujo (estrictamente secuencial dentro de una consulta):
//!   1. Recuperación de los `top_k` chunks (embedding + índice + filtros).
//!   2. Construcción del prompt según el modo.
//!   3. Llamada al modelo principal; si falla por capacidad y hay respaldo,
//!      llamada al modelo de respaldo.
//!   4. Ensamblado de la `RagResponse` con citas y latencias.
//!
//! Si ningún chunk supera el umbral se devuelve la respuesta local "hors
//! contexte" sin llamar a ningún modelo.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::llm::{classify, ChatBackend, ErrorClass};
use crate::models::{Backend, RagResponse};
use crate::prompt::{Mode, Prompt, PromptBuilder, OUT_OF_CONTEXT_ANSWER};
use crate::retriever::{Retriever, SearchFilters};

struct Generation {
    answer: String,
    backend: Backend,
    model: String,
}

pub struct AnswerOrchestrator {
    retriever: Retriever,
    prompts: PromptBuilder,
    primary: Arc<dyn ChatBackend>,
    fallback: Option<Arc<dyn ChatBackend>>,
    top_k: usize,
}

impl AnswerOrchestrator {
    pub fn new(
        retriever: Retriever,
        prompts: PromptBuilder,
        primary: Arc<dyn ChatBackend>,
        fallback: Option<Arc<dyn ChatBackend>>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            prompts,
            primary,
            fallback,
            top_k,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_deref().map(|f| f.name())
    }

    /// Responde a `question`. Sólo `chapter_filter` descarta chunks; sin él,
    /// una mención "chapitre N" en la pregunta completa los resultados con
    /// chunks de ese capítulo y se indica en el prompt.
    pub async fn answer(
        &self,
        question: &str,
        mode: Mode,
        chapter_filter: Option<u32>,
    ) -> Result<RagResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        let hinted = match chapter_filter {
            Some(_) => None,
            None => chapter_hint(question),
        };
        let chapter = chapter_filter.or(hinted);
        let filters = SearchFilters {
            chapter: chapter_filter,
        };

        let started = Instant::now();
        let mut retrieved = self.retriever.search(question, self.top_k, filters).await?;
        if let Some(hinted) = hinted {
            // sin resultados por similitud la consulta sigue fuera de contexto
            if !retrieved.is_empty() {
                self.retriever
                    .extend_with_chapter(&mut retrieved, hinted, self.top_k);
            }
        }
        let retrieval_ms = elapsed_ms(started);

        let generation_started = Instant::now();
        let generation = if retrieved.is_empty() {
            info!("Consulta fuera de contexto | mode={mode} chapter={chapter:?}");
            Generation {
                answer: OUT_OF_CONTEXT_ANSWER.to_string(),
                backend: Backend::OutOfContext,
                model: String::new(),
            }
        } else {
            let prompt = self.prompts.build(question, &retrieved, mode, chapter);
            self.generate(&prompt).await?
        };
        let generation_ms = elapsed_ms(generation_started);
        let latency_ms = elapsed_ms(started);

        info!(
            "Respuesta RAG generada | mode={} chapter={:?} chunks={} backend={:?} retrieval_ms={:.2} generation_ms={:.2} total_ms={:.2}",
            mode,
            chapter,
            retrieved.len(),
            generation.backend,
            retrieval_ms,
            generation_ms,
            latency_ms
        );

        Ok(RagResponse {
            query_id: Uuid::new_v4(),
            question: question.to_string(),
            mode,
            chapter_filter,
            citations: retrieved,
            answer: generation.answer,
            backend: generation.backend,
            model: (!generation.model.is_empty()).then_some(generation.model),
            latency_ms,
            retrieval_ms,
            generation_ms,
            answered_at: Utc::now(),
        })
    }

    /// Igual que `answer`, pero abandona la consulta (y las llamadas de red
    /// en curso) en cuanto se cancela `cancel`.
    pub async fn answer_cancellable(
        &self,
        question: &str,
        mode: Mode,
        chapter_filter: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<RagResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RagError::Cancelled),
            result = self.answer(question, mode, chapter_filter) => result,
        }
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation> {
        let primary_error = match self.primary.complete(prompt).await {
            Ok(answer) => {
                return Ok(Generation {
                    answer,
                    backend: Backend::Primary,
                    model: self.primary.name().to_string(),
                })
            }
            Err(err) => err,
        };

        let fallback = match (classify(&primary_error), &self.fallback) {
            (ErrorClass::Capacity, Some(fallback)) => fallback,
            (class, _) => {
                error!(
                    "Fallo del modelo principal ({class:?}), sin respaldo aplicable: {primary_error}"
                );
                return Err(RagError::GenerationFailed {
                    cause: primary_error,
                });
            }
        };

        warn!(
            "Capacidad agotada en {}. Usando el modelo de respaldo {}.",
            self.primary.name(),
            fallback.name()
        );
        match fallback.complete(prompt).await {
            Ok(answer) => Ok(Generation {
                answer,
                backend: Backend::Fallback,
                model: fallback.name().to_string(),
            }),
            Err(err) => {
                error!("Fallo también el modelo de respaldo: {err}");
                Err(RagError::GenerationFailed { cause: err })
            }
        }
    }
}

/// Extrae el número de capítulo de una mención "chapitre N".
pub fn chapter_hint(question: &str) -> Option<u32> {
    let lower = question.to_lowercase();
    lower.match_indices("chapitre").find_map(|(idx, word)| {
        let rest = lower[idx + word.len()..].trim_start();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    })
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
