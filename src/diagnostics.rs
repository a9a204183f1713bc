//! Per-step diagnostics and restart checkpoints.
//!
//! After every inner loop the minimizer hands a [`StepDiagnostics`] row and the
//! full [`MinimizationState`] to a [`DiagnosticsSink`]. [`CsvDiagnostics`] writes
//! the rows to a CSV file and the state to a bincode checkpoint that
//! [`load_checkpoint`] reads back for a restart.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MinimizerErrorKind, MinimizerResult};
use crate::minimizer::MinimizationState;

/// Scalar summary of one inner loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDiagnostics {
    pub outer: usize,
    pub inner: usize,
    pub gnorm: f64,
    /// `delta[k]`; absent at inner loop 0.
    pub delta: Option<f64>,
    /// `beta[k+1]`; absent at inner loop 0.
    pub beta: Option<f64>,
    pub greduc: Option<f64>,
    pub cost_total: f64,
    pub cost_background: f64,
    pub cost_observation: f64,
    pub orthogonality: f64,
    pub ritz_min: Option<f64>,
    pub ritz_max: Option<f64>,
    pub converged_pairs: Option<usize>,
}

/// Receives diagnostics rows and checkpoints from the minimizer.
pub trait DiagnosticsSink {
    fn record(&mut self, row: &StepDiagnostics) -> MinimizerResult<()>;

    fn checkpoint(&mut self, state: &MinimizationState) -> MinimizerResult<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&mut self, _row: &StepDiagnostics) -> MinimizerResult<()> {
        Ok(())
    }

    fn checkpoint(&mut self, _state: &MinimizationState) -> MinimizerResult<()> {
        Ok(())
    }
}

/// Keeps every row and the latest checkpoint in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub rows: Vec<StepDiagnostics>,
    pub last_checkpoint: Option<MinimizationState>,
}

impl DiagnosticsSink for MemorySink {
    fn record(&mut self, row: &StepDiagnostics) -> MinimizerResult<()> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn checkpoint(&mut self, state: &MinimizationState) -> MinimizerResult<()> {
        self.last_checkpoint = Some(state.clone());
        Ok(())
    }
}

/// Writes rows to `<dir>/diagnostics.csv` and checkpoints to `<dir>/checkpoint.bin`.
pub struct CsvDiagnostics {
    writer: csv::Writer<File>,
    csv_path: PathBuf,
    checkpoint_path: PathBuf,
}

impl CsvDiagnostics {
    pub const CSV_FILE: &'static str = "diagnostics.csv";
    pub const CHECKPOINT_FILE: &'static str = "checkpoint.bin";

    /// Creates the directory if needed and truncates any previous diagnostics.
    pub fn create(dir: impl AsRef<Path>) -> MinimizerResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| io_failure(dir, e))?;
        let csv_path = dir.join(Self::CSV_FILE);
        let writer = csv::Writer::from_path(&csv_path).map_err(|e| io_failure(&csv_path, e))?;
        Ok(Self {
            writer,
            csv_path,
            checkpoint_path: dir.join(Self::CHECKPOINT_FILE),
        })
    }

    /// Reopens the diagnostics of an interrupted run so a resumed minimizer
    /// continues after the rows already written.
    ///
    /// The header is only written when the file is new or empty.
    pub fn append(dir: impl AsRef<Path>) -> MinimizerResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| io_failure(dir, e))?;
        let csv_path = dir.join(Self::CSV_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&csv_path)
            .map_err(|e| io_failure(&csv_path, e))?;
        let fresh = file
            .metadata()
            .map_err(|e| io_failure(&csv_path, e))?
            .len()
            == 0;
        let writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        Ok(Self {
            writer,
            csv_path,
            checkpoint_path: dir.join(Self::CHECKPOINT_FILE),
        })
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }
}

impl DiagnosticsSink for CsvDiagnostics {
    fn record(&mut self, row: &StepDiagnostics) -> MinimizerResult<()> {
        self.writer
            .serialize(row)
            .map_err(|e| io_failure(&self.csv_path, e))?;
        self.writer
            .flush()
            .map_err(|e| io_failure(&self.csv_path, e))?;
        Ok(())
    }

    fn checkpoint(&mut self, state: &MinimizationState) -> MinimizerResult<()> {
        // Write-then-rename keeps the previous checkpoint intact if this one fails.
        let partial = self.checkpoint_path.with_extension("bin.partial");
        {
            let file = File::create(&partial).map_err(|e| io_failure(&partial, e))?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, state).map_err(|e| io_failure(&partial, e))?;
            writer.flush().map_err(|e| io_failure(&partial, e))?;
        }
        fs::rename(&partial, &self.checkpoint_path)
            .map_err(|e| io_failure(&self.checkpoint_path, e))?;
        Ok(())
    }
}

/// Reads a checkpoint written by [`CsvDiagnostics`].
pub fn load_checkpoint(path: impl AsRef<Path>) -> MinimizerResult<MinimizationState> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| io_failure(path, e))?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|e| io_failure(path, e))
}

fn io_failure(path: &Path, error: impl ToString) -> crate::error::MinimizerError {
    MinimizerErrorKind::PersistenceFailure {
        record: path.display().to_string(),
        message: error.to_string(),
    }
    .into()
}
