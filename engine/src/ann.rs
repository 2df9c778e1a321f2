use crate::error::EngineError;
use crate::persist::{self, IndexPaths};
use crate::DocIndex;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Search breadth at layer 0. Governs the recall/latency trade-off.
pub const DEFAULT_EF_SEARCH: usize = 100;

const DEFAULT_M: usize = 16;
const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Candidate ordered so the default BinaryHeap pops the closest first.
#[derive(Clone, Copy)]
struct Candidate {
    id: u32,
    dist: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(other.id.cmp(&self.id))
    }
}

/// Graph-based approximate nearest-neighbor index over the unit-length
/// latent embeddings, using angular distance `1 - dot`. The capacity is
/// fixed when the graph is built; a corpus that has grown past it must
/// be re-indexed before querying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    ml: f64,
    capacity: usize,
    dim: usize,
    vectors: Vec<Vec<f32>>,
    levels: Vec<usize>,
    // neighbors[node][layer] = ids adjacent at that layer
    neighbors: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
    max_level: usize,
    rng_state: u64,
}

impl HnswIndex {
    /// Build a graph over every column of `embeddings`, sized to the
    /// current document count.
    pub fn build(embeddings: &DMatrix<f32>, ef_search: usize) -> Self {
        let mut index = Self {
            m: DEFAULT_M,
            m_max0: DEFAULT_M * 2,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search,
            ml: 1.0 / (DEFAULT_M as f64).ln(),
            capacity: embeddings.ncols(),
            dim: embeddings.nrows(),
            vectors: Vec::with_capacity(embeddings.ncols()),
            levels: Vec::new(),
            neighbors: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng_state: 0x5DEECE66D,
        };
        for col in embeddings.column_iter() {
            index.insert(col.iter().copied().collect());
        }
        index
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Document count the graph was built for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ef_search(&self) -> usize {
        self.ef_search
    }

    /// Approximate nearest neighbors of a unit query vector, as
    /// `(doc_index, score)` with `score = 1 - distance`, best first.
    /// Recall is bounded by the search breadth; the true best match may
    /// be missed.
    pub fn query(&self, vector: &[f32], top_n: usize) -> Vec<(DocIndex, f32)> {
        let entry = match self.entry_point {
            Some(e) => e,
            None => return Vec::new(),
        };
        let mut ep = vec![entry];
        for layer in (1..=self.max_level).rev() {
            if let Some(&(id, _)) = self.search_layer(vector, &ep, 1, layer).first() {
                ep = vec![id];
            }
        }
        let ef = self.ef_search.max(top_n);
        let mut found = self.search_layer(vector, &ep, ef, 0);
        found.truncate(top_n);
        found
            .into_iter()
            .map(|(id, dist)| (id, 1.0 - dist))
            .collect()
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>()
    }

    // LCG, deterministic across runs so a persisted graph is reproducible.
    fn random_level(&mut self) -> usize {
        self.rng_state = self.rng_state.wrapping_mul(0x5DEECE66D).wrapping_add(0xB);
        let r = (self.rng_state >> 17) as f64 / (1u64 << 47) as f64;
        (-(r.max(f64::MIN_POSITIVE).ln()) * self.ml) as usize
    }

    /// Greedy beam search at one layer. Returns `(id, distance)` sorted
    /// ascending by distance, ties by ascending id.
    fn search_layer(&self, query: &[f32], entry_points: &[u32], ef: usize, layer: usize) -> Vec<(u32, f32)> {
        let mut visited: HashSet<u32> = entry_points.iter().copied().collect();
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        for &ep in entry_points {
            let dist = self.distance(query, &self.vectors[ep as usize]);
            candidates.push(Candidate { id: ep, dist });
            results.push(Reverse(Candidate { id: ep, dist }));
        }

        while let Some(Candidate { id, dist }) = candidates.pop() {
            let furthest = results.peek().map(|Reverse(c)| c.dist).unwrap_or(f32::INFINITY);
            if dist > furthest && results.len() >= ef {
                break;
            }
            if layer >= self.neighbors[id as usize].len() {
                continue;
            }
            for &nid in &self.neighbors[id as usize][layer] {
                if !visited.insert(nid) {
                    continue;
                }
                let d = self.distance(query, &self.vectors[nid as usize]);
                let worst = results.peek().map(|Reverse(c)| c.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || d < worst {
                    candidates.push(Candidate { id: nid, dist: d });
                    results.push(Reverse(Candidate { id: nid, dist: d }));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(u32, f32)> = results
            .into_iter()
            .map(|Reverse(c)| (c.id, c.dist))
            .collect();
        out.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        out
    }

    fn insert(&mut self, vector: Vec<f32>) {
        let id = self.vectors.len() as u32;
        let level = self.random_level();
        self.vectors.push(vector);
        self.levels.push(level);
        self.neighbors.push(vec![Vec::new(); level + 1]);

        let entry = match self.entry_point {
            Some(e) => e,
            None => {
                self.entry_point = Some(id);
                self.max_level = level;
                return;
            }
        };

        let query = self.vectors[id as usize].clone();
        let mut ep = vec![entry];
        for layer in (level + 1..=self.max_level).rev() {
            if let Some(&(nearest, _)) = self.search_layer(&query, &ep, 1, layer).first() {
                ep = vec![nearest];
            }
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&query, &ep, self.ef_construction, layer);
            let m_max = if layer == 0 { self.m_max0 } else { self.m };
            for &(nid, _) in found.iter().take(m_max) {
                self.connect(id, nid, layer, m_max);
            }
            ep = found.iter().map(|&(nid, _)| nid).collect();
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
    }

    fn connect(&mut self, a: u32, b: u32, layer: usize, m_max: usize) {
        for (from, to) in [(a, b), (b, a)] {
            let adj = &mut self.neighbors[from as usize][layer];
            if !adj.contains(&to) {
                adj.push(to);
            }
            if self.neighbors[from as usize][layer].len() > m_max {
                self.prune(from, layer, m_max);
            }
        }
    }

    // Keep only the m_max closest neighbors of a node at one layer.
    fn prune(&mut self, node: u32, layer: usize, m_max: usize) {
        let base = self.vectors[node as usize].clone();
        let mut scored: Vec<(u32, f32)> = self.neighbors[node as usize][layer]
            .iter()
            .map(|&nid| (nid, self.distance(&base, &self.vectors[nid as usize])))
            .collect();
        scored.sort_by(|x, y| {
            x.1.partial_cmp(&y.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(x.0.cmp(&y.0))
        });
        scored.truncate(m_max);
        self.neighbors[node as usize][layer] = scored.into_iter().map(|(nid, _)| nid).collect();
    }
}

/// Cached approximate index for k: load the persisted graph if present,
/// otherwise build one over the given embeddings and persist it.
pub fn get_or_build(
    paths: &IndexPaths,
    k: usize,
    embeddings: &DMatrix<f32>,
) -> Result<HnswIndex, EngineError> {
    if let Some(index) = persist::load_ann_index(paths, k)? {
        tracing::debug!(k, "approximate index cache hit");
        return Ok(index);
    }
    tracing::info!(k, docs = embeddings.ncols(), "building approximate index");
    let index = HnswIndex::build(embeddings, DEFAULT_EF_SEARCH);
    persist::save_ann_index(paths, k, &index)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_embeddings(cols: &[[f32; 3]]) -> DMatrix<f32> {
        let mut m = DMatrix::zeros(3, cols.len());
        for (j, col) in cols.iter().enumerate() {
            let norm = col.iter().map(|v| v * v).sum::<f32>().sqrt();
            for (i, v) in col.iter().enumerate() {
                m[(i, j)] = v / norm;
            }
        }
        m
    }

    #[test]
    fn finds_the_matching_direction() {
        let m = unit_embeddings(&[
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.7, 0.7, 0.0],
        ]);
        let index = HnswIndex::build(&m, DEFAULT_EF_SEARCH);
        assert_eq!(index.len(), 4);
        assert_eq!(index.capacity(), 4);
        let hits = index.query(&[1.0, 0.0, 0.0], 2);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn scores_are_one_minus_distance() {
        let m = unit_embeddings(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let index = HnswIndex::build(&m, DEFAULT_EF_SEARCH);
        let hits = index.query(&[1.0, 0.0, 0.0], 2);
        // Orthogonal vector scores ~0, identical ~1.
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
        assert!(hits[1].1.abs() < 1e-5);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let m = DMatrix::<f32>::zeros(3, 0);
        let index = HnswIndex::build(&m, DEFAULT_EF_SEARCH);
        assert!(index.is_empty());
        assert!(index.query(&[1.0, 0.0, 0.0], 5).is_empty());
    }
}
