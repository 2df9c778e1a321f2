use crate::error::EngineError;
use crate::persist::{self, IndexPaths};
use crate::weighting::WeightedMatrix;
use crate::TermId;
use nalgebra::{DMatrix, DVector};

/// Linear projection from term space into the k-dimensional latent
/// space: the transposed top-k left singular vectors of the weighted
/// matrix.
#[derive(Debug, Clone)]
pub struct ReductionModel {
    k: usize,
    projection: DMatrix<f32>,
}

impl ReductionModel {
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn num_terms(&self) -> usize {
        self.projection.ncols()
    }

    pub(crate) fn from_projection(projection: DMatrix<f32>) -> Self {
        Self {
            k: projection.nrows(),
            projection,
        }
    }

    pub(crate) fn projection(&self) -> &DMatrix<f32> {
        &self.projection
    }

    /// Project a sparse term-space vector into the latent space.
    pub fn project(&self, sparse: &[(TermId, f32)]) -> DVector<f32> {
        let mut out = DVector::zeros(self.k);
        for &(term, value) in sparse {
            out.axpy(value, &self.projection.column(term as usize).into_owned(), 1.0);
        }
        out
    }
}

/// Largest exclusive bound on k: `min(term_count, document_count)`.
pub fn rank_limit(weighted: &WeightedMatrix) -> usize {
    weighted.rows().min(weighted.cols())
}

fn validate_rank(weighted: &WeightedMatrix, k: usize) -> Result<(), EngineError> {
    let limit = rank_limit(weighted);
    if k < 1 || k >= limit {
        return Err(EngineError::InvalidRank { k, limit });
    }
    Ok(())
}

/// Rank-k truncated SVD of the weighted matrix. Returns the k x N
/// document embeddings (columns L2-normalized) and the projection
/// model that maps term-space vectors into the same space.
pub fn build(
    weighted: &WeightedMatrix,
    k: usize,
) -> Result<(DMatrix<f32>, ReductionModel), EngineError> {
    validate_rank(weighted, k)?;
    let dense = weighted.to_dense();
    let mut svd = dense.clone().svd(true, true);
    svd.sort_by_singular_values();
    let u = svd.u.expect("svd computed with u");

    // projection = U_k^T, so embeddings = projection * A = Sigma_k V_k^T.
    let projection = u.columns(0, k).transpose();
    let mut embeddings = &projection * &dense;
    normalize_columns(&mut embeddings);
    Ok((embeddings, ReductionModel::from_projection(projection)))
}

/// Cached reduction for k: load the persisted pair unchanged if both
/// artifacts exist, otherwise build, persist, and return. Rank bounds
/// are checked before any cache file is touched.
pub fn get_or_build(
    paths: &IndexPaths,
    weighted: &WeightedMatrix,
    k: usize,
) -> Result<(DMatrix<f32>, ReductionModel), EngineError> {
    validate_rank(weighted, k)?;
    if let Some((embeddings, projection)) = persist::load_reduction(paths, k)? {
        tracing::debug!(k, "reduction cache hit");
        return Ok((embeddings, ReductionModel::from_projection(projection)));
    }
    tracing::info!(k, "computing rank-k reduction");
    let (embeddings, model) = build(weighted, k)?;
    persist::save_reduction(paths, k, &embeddings, model.projection())?;
    Ok((embeddings, model))
}

pub(crate) fn normalize_columns(m: &mut DMatrix<f32>) {
    for mut col in m.column_iter_mut() {
        let norm = col.norm();
        if norm > 0.0 {
            col /= norm;
        }
    }
}
