use crate::error::EngineError;
use crate::index::Vocabulary;
use crate::tokenizer::tokenize;
use crate::TermId;
use std::collections::HashMap;

/// Sparse unit-L2 query vector over the vocabulary, sorted by term id.
/// Ephemeral; never persisted.
pub type QueryVector = Vec<(TermId, f32)>;

/// Turn raw text into a normalized sparse vector. Tokens that are
/// stop-words, non-alphabetic, or absent from the vocabulary are
/// dropped; if nothing survives, the query is rejected rather than
/// normalized into NaN territory.
pub fn parse(raw: &str, vocabulary: &Vocabulary) -> Result<QueryVector, EngineError> {
    let mut counts: HashMap<TermId, u32> = HashMap::new();
    for stem in tokenize(raw) {
        if let Some(id) = vocabulary.get(&stem) {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    if counts.is_empty() {
        return Err(EngineError::EmptyQuery);
    }

    let mut vector: QueryVector = counts
        .into_iter()
        .map(|(id, c)| (id, c as f32))
        .collect();
    let norm = vector.iter().map(|&(_, v)| v * v).sum::<f32>().sqrt();
    for (_, v) in &mut vector {
        *v /= norm;
    }
    vector.sort_unstable_by_key(|&(id, _)| id);
    Ok(vector)
}
