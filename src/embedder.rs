//! Conversión de textos en vectores normalizados.
//!
//! El `Embedder` agrupa las peticiones en lotes de tamaño acotado y delega
//! en un `EmbeddingBackend`. No existe backend de respaldo: si el servicio
//! de embeddings falla, falla la ingesta o la consulta completa.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RagError, Result};
use crate::models::Vector;

/// Servicio remoto de embeddings. Devuelve un vector por texto, en orden.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Calcula los embeddings de `texts` respetando el orden de entrada.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut dimension: Option<usize> = None;

        for batch in texts.chunks(self.batch_size) {
            debug!(
                "Calculando embeddings de un lote de {} textos con {}",
                batch.len(),
                self.model_name()
            );
            let raw = self.backend.embed_batch(batch).await?;
            if raw.len() != batch.len() {
                return Err(RagError::embedding(
                    format!(
                        "Número de embeddings ({}) distinto al número de textos ({})",
                        raw.len(),
                        batch.len()
                    ),
                    false,
                ));
            }

            for mut vector in raw {
                match dimension {
                    None => dimension = Some(vector.len()),
                    Some(dim) if dim != vector.len() => {
                        return Err(RagError::embedding(
                            format!(
                                "Dimensión de embedding inconsistente: {} frente a {}",
                                vector.len(),
                                dim
                            ),
                            false,
                        ));
                    }
                    Some(_) => {}
                }
                if vector.iter().any(|x| !x.is_finite()) {
                    return Err(RagError::embedding(
                        "El backend devolvió un embedding con valores no finitos",
                        false,
                    ));
                }
                l2_normalize(&mut vector);
                vectors.push(vector);
            }
        }

        Ok(vectors)
    }

    /// Embedding de un único texto (la consulta del usuario).
    pub async fn embed_one(&self, text: &str) -> Result<Vector> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::embedding("No se pudo generar embedding de la consulta", false))
    }
}

/// Normaliza `v` in situ. Un vector nulo se deja tal cual.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingBackend {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingBackend for RecordingBackend {
        fn model_name(&self) -> &str {
            "fake-embed"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect())
        }
    }

    struct ShortBackend;

    #[async_trait]
    impl EmbeddingBackend for ShortBackend {
        fn model_name(&self) -> &str {
            "short"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0]])
        }
    }

    #[tokio::test]
    async fn batches_preserve_order_and_normalize() {
        let backend = Arc::new(RecordingBackend {
            batches: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(backend.clone(), 2);
        let texts: Vec<String> = ["a", "bbb", "cc", "dddd", "e"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = embedder.embed(&texts).await.unwrap();

        assert_eq!(*backend.batches.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(vectors.len(), 5);
        for (text, v) in texts.iter().zip(&vectors) {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
            let expected = text.len() as f32 / ((text.len() * text.len()) as f32 + 1.0).sqrt();
            assert!((v[0] - expected).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn count_mismatch_is_a_backend_error() {
        let embedder = Embedder::new(Arc::new(ShortBackend), 8);
        let texts = vec!["uno".to_string(), "dos".to_string()];
        let err = embedder.embed(&texts).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingBackendError { .. }));
        assert!(!err.is_transient());
    }

    struct NanBackend;

    #[async_trait]
    impl EmbeddingBackend for NanBackend {
        fn model_name(&self) -> &str {
            "nan"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![f32::NAN, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn non_finite_components_are_rejected() {
        let embedder = Embedder::new(Arc::new(NanBackend), 8);
        let err = embedder.embed_one("pile").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingBackendError { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn zero_vector_stays_zero() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }
}
