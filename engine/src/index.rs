use crate::{DocIndex, TermId};
use std::collections::HashMap;

/// Append-only term registry. Ids are assigned at first sight and are
/// never reused or renumbered.
#[derive(Debug, Default, Clone)]
pub struct Vocabulary {
    ids: HashMap<String, TermId>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing id for a known term, or a fresh id equal to the current
    /// vocabulary size.
    pub fn resolve_or_create(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.ids.get(term) {
            return id;
        }
        let id = self.ids.len() as TermId;
        self.ids.insert(term.to_string(), id);
        id
    }

    pub fn get(&self, term: &str) -> Option<TermId> {
        self.ids.get(term).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Terms ordered by id, for checkpointing.
    pub fn terms_in_order(&self) -> Vec<String> {
        let mut terms = vec![String::new(); self.ids.len()];
        for (term, &id) in &self.ids {
            terms[id as usize] = term.clone();
        }
        terms
    }

    pub fn from_terms(terms: Vec<String>) -> Self {
        let ids = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i as TermId))
            .collect();
        Self { ids }
    }
}

/// Sparse term-document count matrix. Rows are terms, columns are
/// documents in insertion order. Column entries are sorted by term id.
#[derive(Debug, Default, Clone)]
pub struct TermDocMatrix {
    rows: usize,
    columns: Vec<Vec<(TermId, u32)>>,
}

impl TermDocMatrix {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, doc: DocIndex) -> &[(TermId, u32)] {
        &self.columns[doc as usize]
    }

    pub fn columns(&self) -> &[Vec<(TermId, u32)>] {
        &self.columns
    }

    fn push_column(&mut self, mut entries: Vec<(TermId, u32)>, rows: usize) {
        debug_assert!(rows >= self.rows);
        entries.sort_unstable_by_key(|&(t, _)| t);
        self.rows = rows;
        self.columns.push(entries);
    }

    pub fn from_triplets(
        rows: usize,
        cols: usize,
        entries: impl IntoIterator<Item = (TermId, DocIndex, u32)>,
    ) -> Self {
        let mut columns = vec![Vec::new(); cols];
        for (term, doc, count) in entries {
            columns[doc as usize].push((term, count));
        }
        for col in &mut columns {
            col.sort_unstable_by_key(|&(t, _)| t);
        }
        Self { rows, columns }
    }

    pub fn triplets(&self) -> Vec<(TermId, DocIndex, u32)> {
        let mut out = Vec::new();
        for (doc, col) in self.columns.iter().enumerate() {
            for &(term, count) in col {
                out.push((term, doc as DocIndex, count));
            }
        }
        out
    }
}

/// Vocabulary, document registry, and raw count matrix, mutated only by
/// the indexing path. Invariant: `matrix.rows == vocabulary.len()` and
/// `matrix.cols == documents.len()` after every `record`.
#[derive(Debug, Default, Clone)]
pub struct Index {
    vocabulary: Vocabulary,
    documents: Vec<String>,
    matrix: TermDocMatrix,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(vocabulary: Vocabulary, documents: Vec<String>, matrix: TermDocMatrix) -> Self {
        Self {
            vocabulary,
            documents,
            matrix,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn locator(&self, doc: DocIndex) -> &str {
        &self.documents[doc as usize]
    }

    pub fn num_docs(&self) -> usize {
        self.documents.len()
    }

    pub fn num_terms(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn matrix(&self) -> &TermDocMatrix {
        &self.matrix
    }

    /// Index one document: grow the vocabulary as needed, append one
    /// matrix column and one registry entry. A page with no indexable
    /// terms creates nothing and returns `None`.
    ///
    /// The column entries are fully resolved before anything is pushed,
    /// so the matrix/registry pair never holds a partial column.
    pub fn record(&mut self, locator: &str, term_counts: &HashMap<String, u32>) -> Option<DocIndex> {
        if term_counts.is_empty() {
            return None;
        }
        let entries: Vec<(TermId, u32)> = term_counts
            .iter()
            .map(|(term, &count)| (self.vocabulary.resolve_or_create(term), count))
            .collect();
        let doc = self.documents.len() as DocIndex;
        self.matrix.push_column(entries, self.vocabulary.len());
        self.documents.push(locator.to_string());
        Some(doc)
    }
}
