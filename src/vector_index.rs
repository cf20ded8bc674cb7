//! Índice vectorial exacto en memoria con persistencia binaria.
//!
//! Los vectores se guardan normalizados, así que la similitud coseno se
//! reduce al producto escalar. La búsqueda es exhaustiva y determinista:
//! puntuación descendente y, a igualdad, `vector_id` ascendente.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{RagError, Result};

const MAGIC: &[u8; 4] = b"RCVX";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4 + 8;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dim: usize,
    ids: Vec<u64>,
    // vectores contiguos, `dim` floats por entrada, en orden de inserción
    data: Vec<f32>,
    positions: HashMap<u64, usize>,
    next_id: u64,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ids: Vec::new(),
            data: Vec::new(),
            positions: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, vector_id: u64) -> bool {
        self.positions.contains_key(&vector_id)
    }

    /// Siguiente identificador libre. Nunca reutiliza uno ya asignado.
    pub fn next_vector_id(&self) -> u64 {
        self.next_id
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }

    /// Comprueba que `insert` aceptaría el par sin modificar el índice.
    pub fn check_insert(&self, vector_id: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(RagError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if self.contains(vector_id) {
            return Err(RagError::DuplicateVectorId(vector_id));
        }
        Ok(())
    }

    pub fn insert(&mut self, vector_id: u64, vector: &[f32]) -> Result<()> {
        self.check_insert(vector_id, vector)?;
        self.positions.insert(vector_id, self.ids.len());
        self.ids.push(vector_id);
        self.data.extend_from_slice(vector);
        self.next_id = self.next_id.max(vector_id.saturating_add(1));
        Ok(())
    }

    fn vector_at(&self, position: usize) -> &[f32] {
        &self.data[position * self.dim..(position + 1) * self.dim]
    }

    /// Devuelve los `k` vectores más similares a `query` como `(vector_id, score)`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dim {
            return Err(RagError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(u64, f32)> = self
            .ids
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, dot(query, self.vector_at(pos))))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank_order);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ids.len() * (8 + 4 * self.dim));
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.ids.len() as u64).to_le_bytes());
        for (pos, id) in self.ids.iter().enumerate() {
            out.extend_from_slice(&id.to_le_bytes());
            for value in self.vector_at(pos) {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader { bytes, pos: 0 };

        if reader.take(4)? != MAGIC {
            return Err(RagError::CorruptIndex("cabecera desconocida".to_string()));
        }
        let version = u16::from_le_bytes(reader.array()?);
        if version != FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "versión de formato no soportada: {version}"
            )));
        }
        let dim = u32::from_le_bytes(reader.array()?) as usize;
        let count = u64::from_le_bytes(reader.array()?) as usize;

        let expected = count
            .checked_mul(8 + 4 * dim)
            .and_then(|body| body.checked_add(HEADER_LEN))
            .ok_or_else(|| RagError::CorruptIndex("tamaño declarado inválido".to_string()))?;
        if bytes.len() != expected {
            return Err(RagError::CorruptIndex(format!(
                "se esperaban {expected} bytes, el fichero tiene {}",
                bytes.len()
            )));
        }

        let mut index = Self::new(dim);
        let mut vector = vec![0f32; dim];
        for _ in 0..count {
            let id = u64::from_le_bytes(reader.array()?);
            for slot in vector.iter_mut() {
                *slot = f32::from_le_bytes(reader.array()?);
            }
            index
                .insert(id, &vector)
                .map_err(|e| RagError::CorruptIndex(e.to_string()))?;
        }
        Ok(index)
    }

    /// Escribe el índice en `path` (vía fichero temporal + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.to_bytes())?;
        fs::rename(&tmp, path)?;
        info!("Índice vectorial guardado en {} ({} vectores).", path.display(), self.size());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn rank_order(a: &(u64, f32), b: &(u64, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| RagError::CorruptIndex("fichero truncado".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
