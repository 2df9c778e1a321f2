use engine::engine::{ArtifactLoad, RankMode, MAX_RESULTS};
use engine::error::EngineError;
use engine::index::Index;
use engine::persist::{self, IndexPaths};
use engine::tokenizer::term_counts;
use engine::SearchEngine;
use tempfile::tempdir;

fn index_from_texts(texts: &[&str]) -> Index {
    let mut idx = Index::new();
    for (i, text) in texts.iter().enumerate() {
        idx.record(&format!("https://example.org/doc/{i}"), &term_counts(text));
    }
    idx
}

/// Deterministic corpus of word-salad documents over a small vocabulary.
fn synthetic_corpus(num_docs: usize) -> (Index, Vec<String>) {
    let words = [
        "cat", "dog", "bird", "mouse", "horse", "river", "mountain", "forest", "ocean", "desert",
        "engine", "wheel", "piston", "road", "bridge", "music", "violin", "drum", "song", "melody",
    ];
    let mut state: u64 = 0x9E3779B97F4A7C15;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    let mut idx = Index::new();
    let mut texts = Vec::new();
    for i in 0..num_docs {
        // Each document leans on a theme of four adjacent words and is
        // guaranteed to contain its theme word.
        let theme = i % words.len();
        let mut text = String::from(words[theme]);
        text.push(' ');
        for _ in 0..11 {
            let offset = (next() as usize) % 4;
            text.push_str(words[(theme + offset) % words.len()]);
            text.push(' ');
        }
        idx.record(&format!("https://example.org/doc/{i}"), &term_counts(&text));
        texts.push(text);
    }
    (idx, texts)
}

#[test]
fn exact_ranking_matches_term_frequency_expectations() {
    let idx = index_from_texts(&["cat dog bird", "cat cat mouse", "car truck"]);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());

    let resp = engine.search("cat", 0, false).unwrap();
    assert_eq!(resp.mode, RankMode::Exact);
    assert!(!resp.ann_ignored);
    let order: Vec<u32> = resp.hits.iter().map(|h| h.doc_index).collect();
    assert_eq!(order, vec![1, 0, 2]);
    // The document without the term scores (near) zero.
    assert!(resp.hits[2].score.abs() < 1e-6);
    assert!(resp.hits[0].score > resp.hits[1].score);
}

#[test]
fn results_are_bounded_and_sorted_in_every_mode() {
    let (idx, _) = synthetic_corpus(40);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());

    for (k, ann) in [(0, false), (5, false), (5, true)] {
        let resp = engine.search("cat dog", k, ann).unwrap();
        assert!(resp.hits.len() <= MAX_RESULTS);
        for pair in resp.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for hit in &resp.hits {
            assert!(hit.score.is_finite());
            assert!(hit.locator.starts_with("https://"));
            assert!(hit.annotation.contains("Match accuracy"));
        }
    }
}

#[test]
fn empty_and_stopword_queries_are_rejected() {
    let idx = index_from_texts(&["cat dog bird"]);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());
    assert!(matches!(
        engine.search("", 0, false),
        Err(EngineError::EmptyQuery)
    ));
    assert!(matches!(
        engine.search("the and of", 0, false),
        Err(EngineError::EmptyQuery)
    ));
}

#[test]
fn ann_with_k_zero_falls_back_to_exact_with_flag() {
    let idx = index_from_texts(&["cat dog bird", "cat cat mouse"]);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());
    let resp = engine.search("cat", 0, true).unwrap();
    assert_eq!(resp.mode, RankMode::Exact);
    assert!(resp.ann_ignored);
}

#[test]
fn out_of_range_rank_fails_without_writing_cache() {
    let idx = index_from_texts(&["cat dog bird", "cat cat mouse", "car truck"]);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());
    let limit = engine.num_terms().min(engine.num_docs());
    match engine.search("cat", limit, false) {
        Err(EngineError::InvalidRank { k, .. }) => assert_eq!(k, limit),
        other => panic!("expected InvalidRank, got {other:?}"),
    }
    let paths = IndexPaths::new(dir.path());
    assert!(persist::load_reduction(&paths, limit).unwrap().is_none());
}

#[test]
fn reduction_cache_round_trip_is_numerically_stable() {
    let (idx, _) = synthetic_corpus(25);
    let dir = tempdir().unwrap();

    let first = SearchEngine::from_index(idx.clone(), dir.path());
    let built = first.snapshot(4, false).unwrap();

    // A fresh engine over the same directory must take the load path.
    let second = SearchEngine::from_index(idx, dir.path());
    let loaded = second.snapshot(4, false).unwrap();

    assert_eq!(built.embeddings.nrows(), loaded.embeddings.nrows());
    assert_eq!(built.embeddings.ncols(), loaded.embeddings.ncols());
    for (a, b) in built
        .embeddings
        .iter()
        .zip(loaded.embeddings.iter())
    {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn snapshot_store_keeps_independent_ranks() {
    let (idx, _) = synthetic_corpus(20);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());

    let s3 = engine.snapshot(3, false).unwrap();
    let s5 = engine.snapshot(5, false).unwrap();
    assert_eq!(s3.k, 3);
    assert_eq!(s5.k, 5);
    // Asking again reuses the same handle rather than rebuilding.
    let s3_again = engine.snapshot(3, false).unwrap();
    assert!(std::sync::Arc::ptr_eq(&s3, &s3_again));
}

#[test]
fn ann_upgrade_reuses_cached_reduction() {
    let (idx, _) = synthetic_corpus(20);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());

    let plain = engine.snapshot(4, false).unwrap();
    assert!(plain.ann.is_none());
    let with_ann = engine.snapshot(4, true).unwrap();
    let ann = with_ann.ann.as_ref().expect("ann built on demand");
    assert_eq!(ann.capacity(), engine.num_docs());
    // Embeddings carried over unchanged.
    for (a, b) in plain.embeddings.iter().zip(with_ann.embeddings.iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn approximate_top1_agrees_with_reduced_ranking() {
    let (idx, texts) = synthetic_corpus(80);
    let dir = tempdir().unwrap();
    let engine = SearchEngine::from_index(idx, dir.path());

    let queries: Vec<&str> = texts.iter().map(|t| t.as_str()).take(40).collect();
    let mut agree = 0;
    let mut total = 0;
    for q in queries {
        let reduced = engine.search(q, 6, false).unwrap();
        let approx = engine.search(q, 6, true).unwrap();
        let (Some(r), Some(a)) = (reduced.hits.first(), approx.hits.first()) else {
            continue;
        };
        total += 1;
        if r.doc_index == a.doc_index {
            agree += 1;
        }
    }
    assert!(total >= 30);
    assert!(
        agree as f64 / total as f64 >= 0.95,
        "top-1 agreement {agree}/{total} below 95%"
    );
}

#[test]
fn ann_outgrown_by_corpus_is_a_stale_index_error() {
    let (small, _) = synthetic_corpus(12);
    let dir = tempdir().unwrap();

    // Build and persist an approximate index for the small corpus.
    let engine = SearchEngine::from_index(small, dir.path());
    engine.search("cat dog", 4, true).unwrap();

    // The corpus grows, the cached graph does not.
    let (large, _) = synthetic_corpus(30);
    let engine = SearchEngine::from_index(large, dir.path());
    match engine.search("cat dog", 4, true) {
        Err(EngineError::StaleIndex { capacity, num_docs }) => {
            assert_eq!(capacity, 12);
            assert_eq!(num_docs, 30);
        }
        other => panic!("expected StaleIndex, got {other:?}"),
    }
}

#[test]
fn checkpoint_open_reports_missing_and_loaded_artifacts() {
    let dir = tempdir().unwrap();

    // Nothing on disk yet: everything missing, engine empty but usable.
    let (engine, report) = SearchEngine::open(dir.path()).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.vocabulary, ArtifactLoad::Missing);
    assert_eq!(engine.num_docs(), 0);

    // Persist a real index, reopen, and search it.
    let idx = index_from_texts(&["cat dog bird", "cat cat mouse", "car truck"]);
    let paths = IndexPaths::new(dir.path());
    persist::save_vocabulary(&paths, &idx.vocabulary().terms_in_order()).unwrap();
    persist::save_documents(&paths, idx.documents()).unwrap();
    persist::save_matrix(&paths, idx.matrix()).unwrap();

    let (engine, report) = SearchEngine::open(dir.path()).unwrap();
    assert!(report.is_complete());
    assert_eq!(engine.num_docs(), 3);
    let resp = engine.search("cat", 0, false).unwrap();
    assert_eq!(resp.hits[0].doc_index, 1);
}
