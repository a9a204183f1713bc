//! Persistence of full state-vector snapshots.
//!
//! Lanczos vectors and reconstructed Hessian eigenvectors are written once and
//! read back many times: during reorthogonalization, eigenvector reconstruction,
//! preconditioning in later outer loops, and after a restart. Each record is
//! keyed by a [`RecordId`]; in a distributed run every rank stores only its own
//! tile under the same key.
//!
//! A missing or unreadable record is always fatal ([`MinimizerErrorKind::PersistenceFailure`]).

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use faer::Col;
use serde::{Deserialize, Serialize};

use crate::error::{MinimizerErrorKind, MinimizerResult};
use crate::state::{StateComponent, StateVector};

/// Which family of records a vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archive {
    /// Orthonormal Lanczos vectors `q[1..=Ninner+1]` of an outer loop.
    Lanczos,
    /// Orthonormal Hessian eigenvectors of an outer loop, largest eigenvalue first.
    HessianEigen,
}

/// Key of one persisted vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub archive: Archive,
    /// Outer loop, 1-based.
    pub outer: usize,
    /// Record index within the outer loop, 1-based.
    pub index: usize,
}

impl RecordId {
    pub fn lanczos(outer: usize, index: usize) -> Self {
        Self {
            archive: Archive::Lanczos,
            outer,
            index,
        }
    }

    pub fn hessian(outer: usize, index: usize) -> Self {
        Self {
            archive: Archive::HessianEigen,
            outer,
            index,
        }
    }

    fn file_name(&self) -> String {
        let prefix = match self.archive {
            Archive::Lanczos => "lcz",
            Archive::HessianEigen => "hss",
        };
        format!("{prefix}_{:03}_{:04}.bin", self.outer, self.index)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.archive {
            Archive::Lanczos => "lanczos",
            Archive::HessianEigen => "hessian",
        };
        write!(f, "{name}(outer={}, index={})", self.outer, self.index)
    }
}

/// Persists and retrieves state-vector snapshots. Calls are collective in a
/// distributed run: every rank stores/loads its own tile under the same key.
pub trait VectorStore {
    /// Writes `vector` under `id`, replacing any previous record.
    fn store(&mut self, id: RecordId, vector: &StateVector) -> MinimizerResult<()>;

    /// Reads the record `id`. A missing record is a `PersistenceFailure`.
    fn load(&self, id: RecordId) -> MinimizerResult<StateVector>;

    /// Whether a record exists under `id`.
    fn contains(&self, id: RecordId) -> bool;
}

/// Keeps every record in memory. Records are cloned on load.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    records: HashMap<RecordId, StateVector>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl VectorStore for InMemoryStore {
    fn store(&mut self, id: RecordId, vector: &StateVector) -> MinimizerResult<()> {
        self.records.insert(id, vector.clone());
        Ok(())
    }

    fn load(&self, id: RecordId) -> MinimizerResult<StateVector> {
        self.records
            .get(&id)
            .cloned()
            .ok_or_else(|| MinimizerErrorKind::persistence(id, "record not found").into())
    }

    fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }
}

/// Serialized form of a [`StateVector`]: component slices as plain vectors.
#[derive(Debug, Serialize, Deserialize)]
struct VectorRecord {
    id: RecordId,
    slices: Vec<(StateComponent, Vec<f64>)>,
}

impl VectorRecord {
    fn from_vector(id: RecordId, vector: &StateVector) -> Self {
        let slices = vector
            .components()
            .map(|(c, s)| (c, (0..s.nrows()).map(|i| s[i]).collect()))
            .collect();
        Self { id, slices }
    }

    fn into_vector(self) -> StateVector {
        StateVector::from_slices(
            self.slices
                .into_iter()
                .map(|(c, values)| (c, Col::from_fn(values.len(), |i| values[i]))),
        )
    }
}

/// One bincode file per record inside a directory.
///
/// Values are stored as raw IEEE doubles, so a load returns exactly what was stored.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> MinimizerResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| MinimizerErrorKind::PersistenceFailure {
            record: root.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: RecordId) -> PathBuf {
        self.root.join(id.file_name())
    }
}

impl VectorStore for FileStore {
    fn store(&mut self, id: RecordId, vector: &StateVector) -> MinimizerResult<()> {
        let path = self.path_of(id);
        let file = File::create(&path)
            .map_err(|e| MinimizerErrorKind::persistence(id, format!("{}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &VectorRecord::from_vector(id, vector))
            .map_err(|e| MinimizerErrorKind::persistence(id, format!("{}: {e}", path.display())))?;
        writer
            .flush()
            .map_err(|e| MinimizerErrorKind::persistence(id, format!("{}: {e}", path.display())))?;
        Ok(())
    }

    fn load(&self, id: RecordId) -> MinimizerResult<StateVector> {
        let path = self.path_of(id);
        let file = File::open(&path)
            .map_err(|e| MinimizerErrorKind::persistence(id, format!("{}: {e}", path.display())))?;
        let record: VectorRecord = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| MinimizerErrorKind::persistence(id, format!("{}: {e}", path.display())))?;
        if record.id != id {
            return Err(MinimizerErrorKind::persistence(
                id,
                format!("{} holds record {}", path.display(), record.id),
            )
            .into());
        }
        Ok(record.into_vector())
    }

    fn contains(&self, id: RecordId) -> bool {
        self.path_of(id).is_file()
    }
}
