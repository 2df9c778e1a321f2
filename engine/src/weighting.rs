use crate::index::Index;
use crate::TermId;
use nalgebra::DMatrix;

/// Smoothed inverse document frequency. This is the one idf formula in
/// the engine; every mode that needs idf goes through it.
pub fn idf(df: u32, num_docs: usize) -> f32 {
    ((1.0 + num_docs as f32) / (1.0 + df as f32)).ln() + 1.0
}

/// TF-IDF weighted matrix with unit-L2 document columns, so exact
/// cosine similarity against a unit query is a plain dot product.
/// Derived from the raw counts at startup; never persisted.
#[derive(Debug, Clone)]
pub struct WeightedMatrix {
    rows: usize,
    idf: Vec<f32>,
    columns: Vec<Vec<(TermId, f32)>>,
}

impl WeightedMatrix {
    /// Weight every raw count by its term's idf, then L2-normalize each
    /// document column. Time is proportional to the non-zero count.
    pub fn compute(index: &Index) -> Self {
        let matrix = index.matrix();
        let rows = matrix.rows();
        let num_docs = matrix.cols();

        let mut df = vec![0u32; rows];
        for col in matrix.columns() {
            for &(term, count) in col {
                if count > 0 {
                    df[term as usize] += 1;
                }
            }
        }
        let idf: Vec<f32> = df.iter().map(|&d| idf(d, num_docs)).collect();

        let columns = matrix
            .columns()
            .iter()
            .map(|col| {
                let mut weighted: Vec<(TermId, f32)> = col
                    .iter()
                    .map(|&(term, count)| (term, count as f32 * idf[term as usize]))
                    .collect();
                let norm = weighted.iter().map(|&(_, w)| w * w).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for (_, w) in &mut weighted {
                        *w /= norm;
                    }
                }
                weighted
            })
            .collect();

        Self { rows, idf, columns }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn idf_of(&self, term: TermId) -> f32 {
        self.idf[term as usize]
    }

    /// Dot product of a sparse unit query against one document column.
    /// Both sides must be sorted by term id.
    pub fn dot(&self, query: &[(TermId, f32)], doc: usize) -> f32 {
        let col = &self.columns[doc];
        let mut score = 0.0;
        let (mut i, mut j) = (0, 0);
        while i < query.len() && j < col.len() {
            match query[i].0.cmp(&col[j].0) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    score += query[i].1 * col[j].1;
                    i += 1;
                    j += 1;
                }
            }
        }
        score
    }

    /// Dense copy for the reduction engine's SVD.
    pub fn to_dense(&self) -> DMatrix<f32> {
        let mut dense = DMatrix::zeros(self.rows, self.columns.len());
        for (doc, col) in self.columns.iter().enumerate() {
            for &(term, w) in col {
                dense[(term as usize, doc)] = w;
            }
        }
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn counts(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|&(t, c)| (t.to_string(), c)).collect()
    }

    #[test]
    fn columns_are_unit_length() {
        let mut idx = Index::new();
        idx.record("d0", &counts(&[("cat", 1), ("dog", 2)]));
        idx.record("d1", &counts(&[("cat", 4)]));
        let w = WeightedMatrix::compute(&idx);
        let dense = w.to_dense();
        for d in 0..w.cols() {
            let norm: f32 = dense.column(d).iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn rare_terms_weigh_more() {
        // "cat" in both docs, "dog" in one: idf(dog) > idf(cat).
        let mut idx = Index::new();
        idx.record("d0", &counts(&[("cat", 1), ("dog", 1)]));
        idx.record("d1", &counts(&[("cat", 1)]));
        let w = WeightedMatrix::compute(&idx);
        let cat = idx.vocabulary().get("cat").unwrap();
        let dog = idx.vocabulary().get("dog").unwrap();
        assert!(w.idf_of(dog) > w.idf_of(cat));
    }

    #[test]
    fn dot_matches_dense_product() {
        let mut idx = Index::new();
        idx.record("d0", &counts(&[("cat", 1), ("dog", 2)]));
        idx.record("d1", &counts(&[("dog", 1), ("bird", 3)]));
        let w = WeightedMatrix::compute(&idx);
        let dog = idx.vocabulary().get("dog").unwrap();
        let query = vec![(dog, 1.0f32)];
        let dense = w.to_dense();
        for d in 0..w.cols() {
            let expected = dense[(dog as usize, d)];
            assert!((w.dot(&query, d) - expected).abs() < 1e-6);
        }
    }
}
