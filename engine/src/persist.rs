use crate::ann::HnswIndex;
use crate::error::EngineError;
use crate::index::TermDocMatrix;
use crate::{DocIndex, TermId};
use nalgebra::DMatrix;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

pub const ARTIFACT_VERSION: u32 = 1;

/// Layout of a checkpoint directory.
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
    fn vocabulary(&self) -> PathBuf {
        self.root.join("vocabulary.bin")
    }
    fn documents(&self) -> PathBuf {
        self.root.join("documents.bin")
    }
    fn frontier(&self) -> PathBuf {
        self.root.join("frontier.bin")
    }
    fn matrix(&self) -> PathBuf {
        self.root.join("matrix.bin")
    }
    fn meta(&self) -> PathBuf {
        self.root.join("meta.json")
    }
    fn reduced_matrix(&self, k: usize) -> PathBuf {
        self.root.join(format!("reduced_matrix_{k}.bin"))
    }
    fn reduced_model(&self, k: usize) -> PathBuf {
        self.root.join(format!("reduced_model_{k}.bin"))
    }
    fn ann_index(&self, k: usize) -> PathBuf {
        self.root.join(format!("ann_index_{k}.bin"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub num_terms: usize,
    pub num_docs: usize,
    pub created_at: String,
}

#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    version: u32,
    // Index in the list is the term id.
    terms: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct DocumentsFile {
    version: u32,
    locators: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct FrontierFile {
    version: u32,
    urls: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct MatrixFile {
    version: u32,
    rows: u64,
    cols: u64,
    entries: Vec<(TermId, DocIndex, u32)>,
}

/// Dense k x cols matrix, column-major.
#[derive(Serialize, Deserialize)]
struct DenseFile {
    version: u32,
    nrows: u64,
    ncols: u64,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct AnnFile {
    version: u32,
    index: HnswIndex,
}

/// Write the whole payload to a sibling temp file, then rename it into
/// place. A failed save never leaves a partial artifact behind.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("bin.tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn save_bin<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let bytes = bincode::serialize(value)?;
    atomic_write(path, &bytes)
}

/// Missing file is a cache miss, not an error.
fn load_bin<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EngineError> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(Some(bincode::deserialize(&buf)?))
}

fn check_version(artifact: &'static str, found: u32) -> Result<(), EngineError> {
    if found != ARTIFACT_VERSION {
        return Err(EngineError::Version {
            artifact,
            found,
            expected: ARTIFACT_VERSION,
        });
    }
    Ok(())
}

pub fn save_vocabulary(paths: &IndexPaths, terms: &[String]) -> Result<(), EngineError> {
    save_bin(
        &paths.vocabulary(),
        &VocabularyFile {
            version: ARTIFACT_VERSION,
            terms: terms.to_vec(),
        },
    )
}

pub fn load_vocabulary(paths: &IndexPaths) -> Result<Option<Vec<String>>, EngineError> {
    match load_bin::<VocabularyFile>(&paths.vocabulary())? {
        Some(f) => {
            check_version("vocabulary", f.version)?;
            Ok(Some(f.terms))
        }
        None => Ok(None),
    }
}

pub fn save_documents(paths: &IndexPaths, locators: &[String]) -> Result<(), EngineError> {
    save_bin(
        &paths.documents(),
        &DocumentsFile {
            version: ARTIFACT_VERSION,
            locators: locators.to_vec(),
        },
    )
}

pub fn load_documents(paths: &IndexPaths) -> Result<Option<Vec<String>>, EngineError> {
    match load_bin::<DocumentsFile>(&paths.documents())? {
        Some(f) => {
            check_version("documents", f.version)?;
            Ok(Some(f.locators))
        }
        None => Ok(None),
    }
}

pub fn save_frontier(paths: &IndexPaths, urls: &[String]) -> Result<(), EngineError> {
    save_bin(
        &paths.frontier(),
        &FrontierFile {
            version: ARTIFACT_VERSION,
            urls: urls.to_vec(),
        },
    )
}

pub fn load_frontier(paths: &IndexPaths) -> Result<Option<Vec<String>>, EngineError> {
    match load_bin::<FrontierFile>(&paths.frontier())? {
        Some(f) => {
            check_version("frontier", f.version)?;
            Ok(Some(f.urls))
        }
        None => Ok(None),
    }
}

pub fn save_matrix(paths: &IndexPaths, matrix: &TermDocMatrix) -> Result<(), EngineError> {
    save_bin(
        &paths.matrix(),
        &MatrixFile {
            version: ARTIFACT_VERSION,
            rows: matrix.rows() as u64,
            cols: matrix.cols() as u64,
            entries: matrix.triplets(),
        },
    )
}

pub fn load_matrix(paths: &IndexPaths) -> Result<Option<TermDocMatrix>, EngineError> {
    match load_bin::<MatrixFile>(&paths.matrix())? {
        Some(f) => {
            check_version("matrix", f.version)?;
            Ok(Some(TermDocMatrix::from_triplets(
                f.rows as usize,
                f.cols as usize,
                f.entries,
            )))
        }
        None => Ok(None),
    }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(meta)?;
    atomic_write(&paths.meta(), json.as_bytes())
}

pub fn load_meta(paths: &IndexPaths) -> Result<Option<MetaFile>, EngineError> {
    let buf = match fs::read_to_string(paths.meta()) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&buf)?))
}

fn save_dense(path: &Path, m: &DMatrix<f32>) -> Result<(), EngineError> {
    save_bin(
        path,
        &DenseFile {
            version: ARTIFACT_VERSION,
            nrows: m.nrows() as u64,
            ncols: m.ncols() as u64,
            data: m.as_slice().to_vec(),
        },
    )
}

fn load_dense(path: &Path, artifact: &'static str) -> Result<Option<DMatrix<f32>>, EngineError> {
    match load_bin::<DenseFile>(path)? {
        Some(f) => {
            check_version(artifact, f.version)?;
            Ok(Some(DMatrix::from_column_slice(
                f.nrows as usize,
                f.ncols as usize,
                &f.data,
            )))
        }
        None => Ok(None),
    }
}

/// Reduction cache: two artifacts per k, written model-last so a
/// partially cached pair never looks complete.
pub fn save_reduction(
    paths: &IndexPaths,
    k: usize,
    embeddings: &DMatrix<f32>,
    projection: &DMatrix<f32>,
) -> Result<(), EngineError> {
    save_dense(&paths.reduced_matrix(k), embeddings)?;
    save_dense(&paths.reduced_model(k), projection)
}

pub fn load_reduction(
    paths: &IndexPaths,
    k: usize,
) -> Result<Option<(DMatrix<f32>, DMatrix<f32>)>, EngineError> {
    let embeddings = load_dense(&paths.reduced_matrix(k), "reduced_matrix")?;
    let projection = load_dense(&paths.reduced_model(k), "reduced_model")?;
    match (embeddings, projection) {
        (Some(e), Some(p)) => Ok(Some((e, p))),
        _ => Ok(None),
    }
}

pub fn save_ann_index(paths: &IndexPaths, k: usize, index: &HnswIndex) -> Result<(), EngineError> {
    save_bin(
        &paths.ann_index(k),
        &AnnFile {
            version: ARTIFACT_VERSION,
            index: index.clone(),
        },
    )
}

pub fn load_ann_index(paths: &IndexPaths, k: usize) -> Result<Option<HnswIndex>, EngineError> {
    match load_bin::<AnnFile>(&paths.ann_index(k))? {
        Some(f) => {
            check_version("ann_index", f.version)?;
            Ok(Some(f.index))
        }
        None => Ok(None),
    }
}
