//! Almacén de metadatos de chunks y su emparejamiento con el índice vectorial.
//!
//! `KnowledgeBase` mantiene la biyección `vector_id` ↔ `Chunk`: cada par se
//! valida entero antes de tocar cualquiera de los dos almacenes, así que no
//! puede quedar visible un par a medias.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RagError, Result};
use crate::models::Chunk;
use crate::vector_index::VectorIndex;

/// Línea de `chunks.jsonl`.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    vector_id: u64,
    #[serde(flatten)]
    chunk: Chunk,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    records: HashMap<u64, Chunk>,
}

impl ChunkStore {
    pub fn get(&self, vector_id: u64) -> Option<&Chunk> {
        self.records.get(&vector_id)
    }

    pub fn contains(&self, vector_id: u64) -> bool {
        self.records.contains_key(&vector_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Índice vectorial + metadatos, cargados una vez y compartidos en lectura.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    index: VectorIndex,
    chunks: ChunkStore,
}

impl KnowledgeBase {
    pub fn new(dim: usize) -> Self {
        Self {
            index: VectorIndex::new(dim),
            chunks: ChunkStore::default(),
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn size(&self) -> usize {
        self.index.size()
    }

    pub fn chunk(&self, vector_id: u64) -> Option<&Chunk> {
        self.chunks.get(vector_id)
    }

    /// Inserta el par (chunk, vector) como una unidad y devuelve su `vector_id`.
    pub fn insert(&mut self, chunk: Chunk, vector: &[f32]) -> Result<u64> {
        let vector_id = self.index.next_vector_id();
        self.index.check_insert(vector_id, vector)?;
        if self.chunks.contains(vector_id) {
            return Err(RagError::DuplicateVectorId(vector_id));
        }
        self.index.insert(vector_id, vector)?;
        self.chunks.records.insert(vector_id, chunk);
        Ok(vector_id)
    }

    pub fn save(&self, index_path: &Path, metadata_path: &Path) -> Result<()> {
        self.index.save(index_path)?;

        if let Some(parent) = metadata_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = metadata_path.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for vector_id in self.index.ids() {
            let chunk = self
                .chunks
                .get(vector_id)
                .ok_or(RagError::ChunkMetadataMissing(vector_id))?;
            let record = ChunkRecord {
                vector_id,
                chunk: chunk.clone(),
            };
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, metadata_path)?;

        info!(
            "Metadatos guardados en {} ({} chunks).",
            metadata_path.display(),
            self.chunks.len()
        );
        Ok(())
    }

    /// Carga índice y metadatos y comprueba que se corresponden uno a uno.
    pub fn load(index_path: &Path, metadata_path: &Path) -> Result<Self> {
        let index = VectorIndex::load(index_path)?;

        let mut records = HashMap::new();
        let reader = BufReader::new(File::open(metadata_path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ChunkRecord = serde_json::from_str(&line)?;
            if records.insert(record.vector_id, record.chunk).is_some() {
                return Err(RagError::DuplicateVectorId(record.vector_id));
            }
        }
        let chunks = ChunkStore { records };

        if let Some(missing) = index.ids().find(|id| !chunks.contains(*id)) {
            return Err(RagError::ChunkMetadataMissing(missing));
        }
        if chunks.len() != index.size() {
            return Err(RagError::CorruptIndex(format!(
                "metadatos y vectores no coinciden: {} frente a {}",
                chunks.len(),
                index.size()
            )));
        }

        info!(
            "Base de conocimiento cargada: {} vectores de dimensión {}.",
            index.size(),
            index.dim()
        );
        Ok(Self { index, chunks })
    }
}
