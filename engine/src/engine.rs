use crate::ann::{self, HnswIndex};
use crate::error::EngineError;
use crate::index::{Index, Vocabulary};
use crate::persist::{self, IndexPaths};
use crate::query::{self, QueryVector};
use crate::reduction::{self, ReductionModel};
use crate::weighting::WeightedMatrix;
use crate::DocIndex;
use nalgebra::DMatrix;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Result-list ceiling for every ranking mode.
pub const MAX_RESULTS: usize = 20;

/// Which ranking strategy actually answered a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMode {
    Exact,
    Reduced { k: usize },
    Approximate { k: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_index: DocIndex,
    pub locator: String,
    pub title: String,
    pub score: f32,
    pub annotation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub mode: RankMode,
    /// True when `use_ann` was requested with k == 0 and fell back to
    /// exact ranking. Callers can branch on this instead of parsing a
    /// log line.
    pub ann_ignored: bool,
    pub hits: Vec<SearchHit>,
}

/// Whether each checkpoint artifact was found on disk. A missing
/// artifact means the engine started from the empty state for it; the
/// caller decides whether that is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactLoad {
    Loaded,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub vocabulary: ArtifactLoad,
    pub documents: ArtifactLoad,
    pub matrix: ArtifactLoad,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        [self.vocabulary, self.documents, self.matrix]
            .iter()
            .all(|&a| a == ArtifactLoad::Loaded)
    }
}

/// One immutable rank-k view: projection model, unit embeddings, and
/// (when built) the approximate index over them.
pub struct ReducedSnapshot {
    pub k: usize,
    pub model: ReductionModel,
    pub embeddings: DMatrix<f32>,
    pub ann: Option<HnswIndex>,
}

/// The retrieval engine. The raw index is read-only here; the weighted
/// matrix is derived once at open time. Reduced snapshots live in a
/// store keyed by k, each an independently loadable immutable handle,
/// so concurrent readers with different k never contend on a single
/// "active" slot.
pub struct SearchEngine {
    paths: IndexPaths,
    index: Index,
    weighted: WeightedMatrix,
    snapshots: RwLock<HashMap<usize, Arc<ReducedSnapshot>>>,
}

impl SearchEngine {
    /// Explicit initialization from a checkpoint directory. Missing
    /// artifacts leave their part of the index empty and are called out
    /// in the returned report; they are never silently defaulted away.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<(Self, LoadReport), EngineError> {
        let paths = IndexPaths::new(dir);

        let (terms, vocabulary_load) = match persist::load_vocabulary(&paths)? {
            Some(t) => (t, ArtifactLoad::Loaded),
            None => (Vec::new(), ArtifactLoad::Missing),
        };
        let (locators, documents_load) = match persist::load_documents(&paths)? {
            Some(d) => (d, ArtifactLoad::Loaded),
            None => (Vec::new(), ArtifactLoad::Missing),
        };
        let (matrix, matrix_load) = match persist::load_matrix(&paths)? {
            Some(m) => (m, ArtifactLoad::Loaded),
            None => (Default::default(), ArtifactLoad::Missing),
        };

        let report = LoadReport {
            vocabulary: vocabulary_load,
            documents: documents_load,
            matrix: matrix_load,
        };

        let vocabulary = Vocabulary::from_terms(terms);
        if matrix.rows() != vocabulary.len() || matrix.cols() != locators.len() {
            tracing::warn!(
                matrix_rows = matrix.rows(),
                vocab = vocabulary.len(),
                matrix_cols = matrix.cols(),
                docs = locators.len(),
                "checkpoint artifacts disagree on index shape"
            );
        }
        let index = Index::from_parts(vocabulary, locators, matrix);

        tracing::info!(
            terms = index.num_terms(),
            docs = index.num_docs(),
            complete = report.is_complete(),
            "weighting corpus"
        );
        let weighted = WeightedMatrix::compute(&index);

        Ok((
            Self {
                paths,
                index,
                weighted,
                snapshots: RwLock::new(HashMap::new()),
            },
            report,
        ))
    }

    /// Build an engine directly from an in-memory index, caching
    /// reduction/ANN artifacts under `dir`.
    pub fn from_index<P: AsRef<Path>>(index: Index, dir: P) -> Self {
        let weighted = WeightedMatrix::compute(&index);
        Self {
            paths: IndexPaths::new(dir),
            index,
            weighted,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn num_docs(&self) -> usize {
        self.index.num_docs()
    }

    pub fn num_terms(&self) -> usize {
        self.index.num_terms()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Answer a free-text query. `k == 0` ranks exactly over the
    /// weighted matrix; `k > 0` ranks in the rank-k latent space,
    /// approximately when `use_ann` is set.
    pub fn search(&self, raw: &str, k: usize, use_ann: bool) -> Result<SearchResponse, EngineError> {
        let query = query::parse(raw, self.index.vocabulary())?;

        if k == 0 {
            if use_ann {
                tracing::warn!("approximate search requires k > 0; ranking exactly");
            }
            return Ok(SearchResponse {
                mode: RankMode::Exact,
                ann_ignored: use_ann,
                hits: self.to_hits(self.rank_exact(&query)),
            });
        }

        let snapshot = self.snapshot(k, use_ann)?;
        if use_ann {
            let ann = snapshot.ann.as_ref().expect("snapshot built with ann");
            if ann.capacity() < self.index.num_docs() {
                return Err(EngineError::StaleIndex {
                    capacity: ann.capacity(),
                    num_docs: self.index.num_docs(),
                });
            }
            let projected = self.project_query(&snapshot.model, &query);
            let ranked = ann.query(projected.as_slice(), MAX_RESULTS);
            return Ok(SearchResponse {
                mode: RankMode::Approximate { k },
                ann_ignored: false,
                hits: self.to_hits(ranked),
            });
        }

        Ok(SearchResponse {
            mode: RankMode::Reduced { k },
            ann_ignored: false,
            hits: self.to_hits(self.rank_reduced(&query, &snapshot)),
        })
    }

    /// Exact cosine ranking: unit query against unit document columns.
    pub fn rank_exact(&self, query: &QueryVector) -> Vec<(DocIndex, f32)> {
        let scores: Vec<f32> = (0..self.index.num_docs())
            .map(|d| self.weighted.dot(query, d))
            .collect();
        top_hits(&scores)
    }

    /// Reduced cosine ranking in the snapshot's latent space.
    pub fn rank_reduced(&self, query: &QueryVector, snapshot: &ReducedSnapshot) -> Vec<(DocIndex, f32)> {
        let projected = self.project_query(&snapshot.model, query);
        let scores: Vec<f32> = snapshot
            .embeddings
            .column_iter()
            .map(|col| projected.dot(&col.into_owned()))
            .collect();
        top_hits(&scores)
    }

    fn project_query(&self, model: &ReductionModel, query: &QueryVector) -> nalgebra::DVector<f32> {
        let mut projected = model.project(query);
        let norm = projected.norm();
        if norm > 0.0 {
            projected /= norm;
        }
        projected
    }

    /// Snapshot store lookup. A hit is reused as-is; a miss goes
    /// through the on-disk caches before recomputing. When the cached
    /// snapshot lacks the approximate index and one is needed, the
    /// reduction is reused and only the graph is built.
    pub fn snapshot(&self, k: usize, want_ann: bool) -> Result<Arc<ReducedSnapshot>, EngineError> {
        {
            let cache = self.snapshots.read();
            if let Some(snap) = cache.get(&k) {
                if !want_ann || snap.ann.is_some() {
                    return Ok(Arc::clone(snap));
                }
            }
        }

        let existing = self.snapshots.read().get(&k).cloned();
        let (embeddings, model) = match existing {
            Some(snap) => (snap.embeddings.clone(), snap.model.clone()),
            None => reduction::get_or_build(&self.paths, &self.weighted, k)?,
        };
        let ann = if want_ann {
            Some(ann::get_or_build(&self.paths, k, &embeddings)?)
        } else {
            None
        };
        let snap = Arc::new(ReducedSnapshot {
            k,
            model,
            embeddings,
            ann,
        });
        self.snapshots.write().insert(k, Arc::clone(&snap));
        Ok(snap)
    }

    fn to_hits(&self, ranked: Vec<(DocIndex, f32)>) -> Vec<SearchHit> {
        ranked
            .into_iter()
            .map(|(doc, score)| {
                let locator = self.index.locator(doc).to_string();
                SearchHit {
                    doc_index: doc,
                    title: locator.clone(),
                    locator,
                    score,
                    annotation: format!("Match accuracy: {score:.4}"),
                }
            })
            .collect()
    }
}

/// Descending by score, ties by ascending document index, truncated to
/// `MAX_RESULTS`.
fn top_hits(scores: &[f32]) -> Vec<(DocIndex, f32)> {
    let mut ranked: Vec<(DocIndex, f32)> = scores
        .iter()
        .enumerate()
        .map(|(d, &s)| (d as DocIndex, s))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked.truncate(MAX_RESULTS);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_hits_orders_and_truncates() {
        let scores: Vec<f32> = (0..30).map(|i| (i % 5) as f32).collect();
        let ranked = top_hits(&scores);
        assert_eq!(ranked.len(), MAX_RESULTS);
        for pair in ranked.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
            if (pair[0].1 - pair[1].1).abs() < f32::EPSILON {
                assert!(pair[0].0 < pair[1].0);
            }
        }
        // Highest score, lowest index first.
        assert_eq!(ranked[0], (4, 4.0));
    }
}
