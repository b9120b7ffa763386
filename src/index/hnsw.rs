//! HNSWIndexManager (C6): an approximate-nearest-neighbor graph over every
//! ChunkRecord's vector, grounded on the `hnsw_rs` crate (this codebase's
//! own vector backend is an external database and produces no standalone
//! index file, so this manager is adopted from the sibling retrieval
//! examples in the pack instead).
//!
//! `hnsw_rs` has no stable on-disk serialization for its internal graph, so
//! rather than betting on its native dump format this manager persists the
//! inputs the graph is a pure function of — the PointID↔label sidecar and
//! the raw vectors — in a small length-prefixed container, and rebuilds the
//! in-memory graph by re-inserting them at load time. The rebuild cost is
//! paid once per load, not per query.

use std::path::Path;

use hnsw_rs::dist::DistCosine;
use hnsw_rs::hnsw::Hnsw;

use crate::error::EngineError;
use crate::error::Result;
use crate::index::IndexKind;
use crate::index::rebuild;
use crate::index::scan_records;
use crate::types::PointId;

const MAGIC: &[u8; 4] = b"HNS1";

#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub max_nb_connection: usize,
    pub max_layer: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    /// Calibrated for collections up to roughly 1M vectors, per the open
    /// question in the design notes; larger collections should widen
    /// `ef_construction`/`ef_search` via config.
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            max_layer: 16,
            ef_construction: 200,
            ef_search: 100,
        }
    }
}

pub struct HnswIndexManager {
    hnsw: Hnsw<'static, f32, DistCosine>,
    labels: Vec<PointId>,
    ef_search: usize,
}

impl HnswIndexManager {
    pub fn index_exists(indexes_dir: &Path) -> bool {
        IndexKind::Hnsw.final_path(indexes_dir).is_file()
    }

    /// Scans `collection_dir/vectors/` and builds a fresh graph, persisting
    /// it through the shared rebuild-with-lock protocol (C7).
    pub fn rebuild_from_vectors(collection_dir: &Path, params: HnswParams) -> Result<()> {
        let records = scan_records(collection_dir)?;
        let indexes_dir = collection_dir.join("indexes");

        rebuild::rebuild_with_lock(&indexes_dir, IndexKind::Hnsw, move || {
            let labels: Vec<PointId> = records.iter().map(|r| r.id.clone()).collect();
            let vectors: Vec<Vec<f32>> = records.into_iter().map(|r| r.vector).collect();
            Ok(encode(&labels, &vectors, &params))
        })?;
        Ok(())
    }

    pub fn load_index(indexes_dir: &Path) -> Result<Self> {
        let path = IndexKind::Hnsw.final_path(indexes_dir);
        let bytes = std::fs::read(&path).map_err(|e| EngineError::storage_io(&path, e))?;
        let (labels, vectors, params) = decode(&bytes)?;

        let n = labels.len();
        let hnsw: Hnsw<'static, f32, DistCosine> = Hnsw::new(
            params.max_nb_connection,
            n.max(1),
            params.max_layer,
            params.ef_construction,
            DistCosine {},
        );
        for (i, vector) in vectors.iter().enumerate() {
            hnsw.insert((vector, i));
        }

        Ok(Self {
            hnsw,
            labels,
            ef_search: params.ef_search,
        })
    }

    /// Top-`k` nearest neighbors by cosine distance.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(PointId, f32)>> {
        if self.labels.is_empty() {
            return Ok(Vec::new());
        }
        let neighbours = self.hnsw.search(vector, k.max(1), self.ef_search.max(k.max(1)));
        Ok(neighbours
            .into_iter()
            .filter_map(|n| self.labels.get(n.d_id).map(|id| (id.clone(), n.distance)))
            .collect())
    }
}

fn encode(labels: &[PointId], vectors: &[Vec<f32>], params: &HnswParams) -> Vec<u8> {
    let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(params.ef_search as u32).to_le_bytes());
    out.extend_from_slice(&(labels.len() as u32).to_le_bytes());
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    out.extend_from_slice(&(params.max_nb_connection as u32).to_le_bytes());
    out.extend_from_slice(&(params.max_layer as u32).to_le_bytes());
    out.extend_from_slice(&(params.ef_construction as u32).to_le_bytes());
    for label in labels {
        let bytes = label.0.as_bytes();
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(bytes);
    }
    for vector in vectors {
        for component in vector {
            out.extend_from_slice(&component.to_le_bytes());
        }
    }
    out
}

fn decode(bytes: &[u8]) -> Result<(Vec<PointId>, Vec<Vec<f32>>, HnswParams)> {
    let corrupt = |reason: &str| EngineError::IndexCorrupt {
        index: "hnsw_index.bin".to_string(),
        reason: reason.to_string(),
    };
    if bytes.len() < 28 || &bytes[0..4] != MAGIC {
        return Err(corrupt("missing or invalid magic header"));
    }
    let ef_search = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let count = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let dim = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    let max_nb_connection = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
    let max_layer = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;
    let ef_construction = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;

    let mut offset = 28;
    let mut labels = Vec::with_capacity(count);
    for _ in 0..count {
        if offset + 2 > bytes.len() {
            return Err(corrupt("truncated label length"));
        }
        let len = u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        if offset + len > bytes.len() {
            return Err(corrupt("truncated label bytes"));
        }
        let id = std::str::from_utf8(&bytes[offset..offset + len]).map_err(|_| corrupt("label is not valid UTF-8"))?;
        labels.push(PointId(id.to_string()));
        offset += len;
    }

    let mut vectors = Vec::with_capacity(count);
    for _ in 0..count {
        let mut vector = Vec::with_capacity(dim);
        for _ in 0..dim {
            if offset + 4 > bytes.len() {
                return Err(corrupt("truncated vector component"));
            }
            vector.push(f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()));
            offset += 4;
        }
        vectors.push(vector);
    }

    Ok((
        labels,
        vectors,
        HnswParams {
            max_nb_connection,
            max_layer,
            ef_construction,
            ef_search,
        },
    ))
}
