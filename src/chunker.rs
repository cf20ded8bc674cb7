//! Troceado de documentos en ventanas deslizantes de tamaño fijo.
//!
//! El chunk `i` cubre los caracteres
//! `[i * (chunk_size - overlap), i * (chunk_size - overlap) + chunk_size)`,
//! recortado a la longitud del documento. Los offsets son de caracteres,
//! nunca de bytes.

use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Parámetros de troceado. Se validan antes de cualquier llamada de red.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(RagError::InvalidChunkConfig {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Trocea `document`. La secuencia es perezosa, finita y reiniciable
/// (clonar el iterador vuelve a producir los mismos chunks).
pub fn chunk(document: &Document, chunk_size: usize, overlap: usize) -> Result<Chunks<'_>> {
    let config = ChunkConfig::new(chunk_size, overlap)?;
    Ok(Chunks::new(document, config))
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    document: &'a Document,
    config: ChunkConfig,
    // offset en bytes de cada carácter, más el final del texto
    byte_offsets: Arc<[usize]>,
    next_index: usize,
}

impl<'a> Chunks<'a> {
    pub fn new(document: &'a Document, config: ChunkConfig) -> Self {
        let byte_offsets: Arc<[usize]> = document
            .text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(document.text.len()))
            .collect();
        Self {
            document,
            config,
            byte_offsets,
            next_index: 0,
        }
    }

    fn char_len(&self) -> usize {
        self.byte_offsets.len() - 1
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let len = self.char_len();
        let start = self.next_index * self.config.step();
        if start >= len {
            return None;
        }
        let end = (start + self.config.chunk_size).min(len);
        let sequence = self.next_index;
        self.next_index += 1;

        let doc = self.document;
        let text = &doc.text[self.byte_offsets[start]..self.byte_offsets[end]];
        Some(Chunk {
            chunk_id: format!("{}::{}", doc.id, sequence + 1),
            document_id: doc.id.clone(),
            chapter: doc.chapter,
            pages: doc.page_range(start, end),
            text: text.to_string(),
            sequence,
            start_offset: start,
            source_filename: doc.source_filename.clone(),
            tags: doc.tags.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.char_len();
        let start = self.next_index * self.config.step();
        let remaining = if start >= len {
            0
        } else {
            (len - start).div_ceil(self.config.step())
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
