pub mod ann;
pub mod engine;
pub mod error;
pub mod index;
pub mod persist;
pub mod query;
pub mod reduction;
pub mod tokenizer;
pub mod weighting;

pub type TermId = u32;
pub type DocIndex = u32;

pub use engine::{LoadReport, RankMode, SearchEngine, SearchHit, SearchResponse};
pub use error::EngineError;
pub use index::{Index, TermDocMatrix};
