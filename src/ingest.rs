//! Ingesta offline: recorre un directorio de PDFs de curso, trocea cada
//! documento, calcula los embeddings por lotes y construye la base de
//! conocimiento (índice vectorial + `chunks.jsonl`).
//!
//! Se ejecuta como trabajo separado, nunca a la vez que el servidor.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::{
    chunker::{ChunkConfig, Chunks},
    config::AppConfig,
    embedder::Embedder,
    error::RagError,
    llm::LlmManager,
    models::{Chunk, Document, Vector},
    store::KnowledgeBase,
};

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub chunks_created: usize,
    pub blank_chunks_skipped: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} chunks creados ({} vacíos descartados).",
            self.files_scanned,
            self.files_ingested,
            self.files_skipped,
            self.chunks_created,
            self.blank_chunks_skipped
        )
    }
}

/// Nombre del manifiesto opcional en la raíz del directorio de ingesta.
pub const MANIFEST_FILE: &str = "docs.yaml";

/// Lista de documentos del curso: capítulo y temas de cada PDF. Los PDFs
/// que no aparecen se ingieren igual, con el capítulo deducido del nombre.
#[derive(Debug, Default, Deserialize)]
pub struct CourseManifest {
    #[serde(default)]
    pub documents: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub chapter: Option<u32>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl CourseManifest {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| anyhow!("No se pudo interpretar el manifiesto {MANIFEST_FILE}: {e}"))
    }

    /// Carga `root/docs.yaml`. Sin fichero, el manifiesto queda vacío.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let manifest = Self::from_yaml(&std::fs::read_to_string(&path)?)?;
        info!(
            "Manifiesto {} cargado: {} documentos",
            path.display(),
            manifest.documents.len()
        );
        Ok(manifest)
    }

    fn entry_for(&self, filename: &str) -> Option<&ManifestEntry> {
        let wanted = std::ffi::OsStr::new(filename);
        self.documents
            .iter()
            .find(|e| Path::new(&e.filename).file_name() == Some(wanted))
    }

    /// Completa un documento extraído con el id, el capítulo y los temas
    /// declarados para su fichero.
    pub fn apply(&self, mut doc: Document) -> Document {
        let Some(entry) = doc
            .source_filename
            .as_deref()
            .and_then(|name| self.entry_for(name))
        else {
            return doc;
        };
        if let Some(id) = &entry.id {
            doc.id = id.clone();
        }
        if entry.chapter.is_some() {
            doc.chapter = entry.chapter;
        }
        doc.with_tags(entry.topics.clone())
    }
}

/// Política de reintentos para errores transitorios de embeddings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

pub struct Ingestor {
    embedder: Embedder,
    chunking: ChunkConfig,
    retry: RetryPolicy,
}

impl Ingestor {
    pub fn new(embedder: Embedder, chunking: ChunkConfig) -> Self {
        Self {
            embedder,
            chunking,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Recorre `root` buscando PDFs y construye la base de conocimiento.
    pub async fn ingest_directory(&self, root: &Path) -> Result<(KnowledgeBase, IngestionSummary)> {
        if !root.is_dir() {
            return Err(anyhow!("La ruta no es un directorio: {}", root.display()));
        }

        let manifest = CourseManifest::load(root)?;
        let manifest_path = root.join(MANIFEST_FILE);

        let mut summary = IngestionSummary::default();
        let mut file_entries: Vec<_> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.path() != manifest_path)
            .collect();
        file_entries.sort_by(|a, b| a.path().cmp(b.path()));

        let mut documents = Vec::new();
        for entry in &file_entries {
            summary.files_scanned += 1;
            let path = entry.path().to_path_buf();
            match load_pdf(&path).await {
                Ok(Some(doc)) => {
                    summary.files_ingested += 1;
                    documents.push(manifest.apply(doc));
                }
                Ok(None) => summary.files_skipped += 1,
                Err(err) => {
                    summary.files_skipped += 1;
                    error!("Error extrayendo {}: {err}", path.display());
                }
            }
        }

        let (knowledge, stats) = self.ingest_documents(&documents).await?;
        summary.chunks_created = stats.chunks_created;
        summary.blank_chunks_skipped = stats.blank_chunks_skipped;
        Ok((knowledge, summary))
    }

    /// Trocea, calcula embeddings e inserta cada par (chunk, vector).
    pub async fn ingest_documents(
        &self,
        documents: &[Document],
    ) -> std::result::Result<(KnowledgeBase, IngestionSummary), RagError> {
        let mut stats = IngestionSummary::default();
        let mut chunks: Vec<Chunk> = Vec::new();
        for doc in documents {
            for chunk in Chunks::new(doc, self.chunking) {
                if chunk.text.trim().is_empty() {
                    stats.blank_chunks_skipped += 1;
                    continue;
                }
                chunks.push(chunk);
            }
        }
        info!(
            "{} chunks generados a partir de {} documentos",
            chunks.len(),
            documents.len()
        );

        let mut knowledge: Option<KnowledgeBase> = None;
        let group = self.embedder.batch_size();
        let total_groups = chunks.len().div_ceil(group);

        for (i, batch) in chunks.chunks(group).enumerate() {
            info!("[{}/{}] Calculando embeddings...", i + 1, total_groups);
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_with_retry(&texts).await?;

            for (chunk, vector) in batch.iter().zip(vectors) {
                let kb = knowledge.get_or_insert_with(|| KnowledgeBase::new(vector.len()));
                kb.insert(chunk.clone(), &vector)?;
                stats.chunks_created += 1;
            }
        }

        Ok((knowledge.unwrap_or_else(|| KnowledgeBase::new(0)), stats))
    }

    async fn embed_with_retry(&self, texts: &[String]) -> std::result::Result<Vec<Vector>, RagError> {
        let mut attempt = 1u32;
        loop {
            match self.embedder.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay * attempt;
                    warn!(
                        "Capacidad de embeddings alcanzada (intento {}/{}). Nuevo intento en {:.1}s",
                        attempt,
                        self.retry.max_attempts,
                        delay.as_secs_f32()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Extrae un PDF página a página. Devuelve `None` si el fichero no es un
/// PDF o no contiene texto útil.
async fn load_pdf(path: &Path) -> Result<Option<Document>> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("");
    if !extension.eq_ignore_ascii_case("pdf") {
        info!("Saltando fichero con extensión no soportada ('.{}'): {}", extension, path.display());
        return Ok(None);
    }

    let owned = path.to_path_buf();
    let pages = match tokio::task::spawn_blocking(move || pdf_extract::extract_text_by_pages(&owned)).await? {
        Ok(pages) => pages,
        Err(e) => {
            warn!("No se pudo extraer texto del PDF {}: {}. Saltando fichero.", path.display(), e);
            return Ok(None);
        }
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| stem.clone());

    let numbered = pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i as u32 + 1, text));
    let doc = Document::from_pages(stem.clone(), chapter_from_name(&stem), numbered)
        .with_source(filename);

    if doc.char_len() == 0 {
        warn!("Fichero vacío o sin texto útil: {}", path.display());
        return Ok(None);
    }
    info!(
        "Extraído {} ({} páginas con texto, capítulo {:?})",
        path.display(),
        doc.pages.len(),
        doc.chapter
    );
    Ok(Some(doc))
}

/// Primer número del nombre del fichero: `chapitre_03_piles` → 3.
fn chapter_from_name(stem: &str) -> Option<u32> {
    stem.split(|c: char| !c.is_ascii_digit())
        .find(|token| !token.is_empty())
        .and_then(|token| token.parse().ok())
}

/// Trabajo de ingesta completo: extrae, indexa y persiste en las rutas
/// configuradas.
pub async fn run(cfg: &AppConfig, root: &Path) -> Result<IngestionSummary> {
    cfg.require_credentials(false)?;
    let backend = LlmManager::embedding_from_config(cfg)?;
    let embedder = Embedder::new(backend, cfg.embed_batch_size);
    let ingestor = Ingestor::new(embedder, cfg.chunking);

    let (knowledge, summary) = ingestor.ingest_directory(root).await?;
    if knowledge.size() == 0 {
        return Err(anyhow!(
            "No se generó ningún chunk. ¿Contiene {} PDFs con texto?",
            root.display()
        ));
    }
    knowledge.save(&cfg.index_path, &cfg.metadata_path)?;
    info!("{summary}");
    Ok(summary)
}
