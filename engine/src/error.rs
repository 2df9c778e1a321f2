use thiserror::Error;

/// Errors surfaced by the retrieval engine. Variants are explicit so
/// callers can branch on them rather than parse log output.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The query contained no token that survives normalization and
    /// vocabulary lookup.
    #[error("query has no indexable terms")]
    EmptyQuery,

    /// Requested reduction rank is outside `1 ..= limit`.
    #[error("reduction rank k={k} outside valid range 1..{limit} (min of term and document counts)")]
    InvalidRank { k: usize, limit: usize },

    /// The approximate index was built for a smaller corpus than the
    /// one now loaded; it must be rebuilt before it can be queried.
    #[error("approximate index built for {capacity} documents but corpus has {num_docs}; delete the cached index to rebuild")]
    StaleIndex { capacity: usize, num_docs: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode/decode error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("meta file error: {0}")]
    Meta(#[from] serde_json::Error),

    /// A persisted artifact decoded but carried an unknown version.
    #[error("unsupported artifact version {found} in {artifact} (expected {expected})")]
    Version {
        artifact: &'static str,
        found: u32,
        expected: u32,
    },
}
