//! Modelos de dominio: documentos extraídos, chunks, resultados de búsqueda
//! y la respuesta RAG que consumen las capas web/CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::prompt::Mode;

/// Vector de embedding. Se almacena siempre normalizado (norma L2 = 1).
pub type Vector = Vec<f32>;

/// Tramo de una página dentro del texto completo del documento,
/// en offsets de caracteres `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub start: usize,
    pub end: usize,
}

/// Documento producido por el extractor de PDF. Inmutable una vez creado.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub chapter: Option<u32>,
    pub pages: Vec<Page>,
    pub source_filename: Option<String>,
    pub tags: Vec<String>,
    char_len: usize,
}

impl Document {
    /// Construye un documento a partir del texto de cada página.
    ///
    /// Normaliza cada página (`\r` → `\n`, espacio no separable → espacio,
    /// recorte de extremos), descarta las páginas vacías y las une con una
    /// línea en blanco, registrando el tramo de caracteres de cada una.
    pub fn from_pages(
        id: impl Into<String>,
        chapter: Option<u32>,
        pages: impl IntoIterator<Item = (u32, String)>,
    ) -> Self {
        const SEPARATOR: &str = "\n\n";

        let mut text = String::new();
        let mut spans = Vec::new();
        let mut offset = 0usize;

        for (number, raw) in pages {
            let clean = normalize_page_text(&raw);
            if clean.is_empty() {
                continue;
            }
            if !spans.is_empty() {
                text.push_str(SEPARATOR);
                offset += SEPARATOR.chars().count();
            }
            let len = clean.chars().count();
            spans.push(Page {
                number,
                start: offset,
                end: offset + len,
            });
            text.push_str(&clean);
            offset += len;
        }

        Self {
            id: id.into(),
            text,
            chapter,
            pages: spans,
            source_filename: None,
            tags: Vec::new(),
            char_len: offset,
        }
    }

    /// Documento de una sola página (útil para textos planos).
    pub fn single_page(id: impl Into<String>, chapter: Option<u32>, text: impl Into<String>) -> Self {
        Self::from_pages(id, chapter, [(1, text.into())])
    }

    pub fn with_source(mut self, filename: impl Into<String>) -> Self {
        self.source_filename = Some(filename.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Longitud del texto en caracteres (no en bytes).
    pub fn char_len(&self) -> usize {
        self.char_len
    }

    /// Páginas tocadas por el tramo de caracteres `[start, end)`.
    pub fn page_range(&self, start: usize, end: usize) -> PageRange {
        let Some(first_page) = self.pages.first() else {
            return PageRange { first: 0, last: 0 };
        };
        let first = self
            .pages
            .iter()
            .take_while(|p| p.start <= start)
            .last()
            .unwrap_or(first_page);
        let last = self
            .pages
            .iter()
            .take_while(|p| p.start < end)
            .last()
            .unwrap_or(first);
        PageRange {
            first: first.number,
            last: last.number.max(first.number),
        }
    }
}

fn normalize_page_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "page {}", self.first)
        } else {
            write!(f, "pages {}-{}", self.first, self.last)
        }
    }
}

/// Tramo acotado de texto de un documento: la unidad de recuperación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chapter: Option<u32>,
    pub pages: PageRange,
    pub text: String,
    pub sequence: usize,
    pub start_offset: usize,
    #[serde(default)]
    pub source_filename: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Chunk {
    /// Etiqueta de cita que acompaña al texto inyectado en el prompt.
    pub fn citation(&self) -> String {
        let chapter = self
            .chapter
            .map(|c| c.to_string())
            .unwrap_or_else(|| "?".to_string());
        let mut tag = format!("Chapitre {chapter}, {}", self.pages);
        if let Some(source) = &self.source_filename {
            tag.push_str(&format!(" ({source})"));
        }
        tag
    }
}

/// Chunk devuelto por el `Retriever`, con su puntuación y su posición.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub score: f32,
    pub rank: usize,
}

/// Origen de la respuesta generada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Primary,
    Fallback,
    /// Respuesta local determinista: ningún chunk superó el umbral.
    OutOfContext,
}

/// Respuesta completa de una consulta. La posee el llamante; no hay caché.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub query_id: Uuid,
    pub question: String,
    pub mode: Mode,
    pub chapter_filter: Option<u32>,
    pub citations: Vec<RetrievedChunk>,
    pub answer: String,
    pub backend: Backend,
    pub model: Option<String>,
    pub latency_ms: f64,
    pub retrieval_ms: f64,
    pub generation_ms: f64,
    pub answered_at: DateTime<Utc>,
}
