//! Run configuration of the minimization engine.
//!
//! Loaded from TOML, for example:
//!
//! ```toml
//! n_outer = 2
//! n_inner = 10
//! precondition = true
//! mode = 2
//! ritz_lmp = false
//! ritz_max_err = 1.0e-3
//! ```
//!
//! Every field has a default, so a partial file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MinimizerErrorKind, MinimizerResult};
use crate::preconditioner::PreconditionerMode;

/// Switches and tolerances of one incremental 4D-Var minimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinimizerConfig {
    /// Number of outer loops (re-linearizations).
    pub n_outer: usize,
    /// Number of inner loops per outer loop; the final inner index is `n_inner`.
    pub n_inner: usize,
    /// Precondition outer loops `2..` with the Hessian eigenpairs of earlier loops.
    pub precondition: bool,
    /// How eigenvalues become preconditioner scalings.
    pub mode: PreconditionerMode,
    /// Add the Ritz correction to the square-root spectral modes.
    pub ritz_lmp: bool,
    /// Largest relative Ritz error bound for a pair to count as converged.
    pub ritz_max_err: f64,
    /// Compute Ritz pairs and Hessian eigenvectors even without preconditioning.
    pub hessian_eigenvectors: bool,
    /// Loss of Lanczos orthogonality above which a warning is logged.
    pub orthogonality_tolerance: f64,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            n_outer: 1,
            n_inner: 10,
            precondition: false,
            mode: PreconditionerMode::default(),
            ritz_lmp: false,
            ritz_max_err: 1.0e-3,
            hessian_eigenvectors: false,
            orthogonality_tolerance: 1.0e-8,
        }
    }
}

impl MinimizerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> MinimizerResult<Self> {
        let config: MinimizerConfig = toml::from_str(s)
            .map_err(|e| MinimizerErrorKind::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MinimizerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MinimizerErrorKind::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Whether Ritz pairs are computed at every inner loop.
    pub fn needs_ritz(&self) -> bool {
        self.precondition || self.hessian_eigenvectors
    }

    /// Checks the invariants the minimizer relies on.
    pub fn validate(&self) -> MinimizerResult<()> {
        if self.n_outer == 0 {
            return Err(invalid("n_outer must be at least 1"));
        }
        if self.n_inner == 0 {
            return Err(invalid("n_inner must be at least 1"));
        }
        if !(self.ritz_max_err.is_finite() && self.ritz_max_err >= 0.0) {
            return Err(invalid(format!(
                "ritz_max_err must be a non-negative number, got {}",
                self.ritz_max_err
            )));
        }
        if !(self.orthogonality_tolerance.is_finite() && self.orthogonality_tolerance > 0.0) {
            return Err(invalid(format!(
                "orthogonality_tolerance must be positive, got {}",
                self.orthogonality_tolerance
            )));
        }
        if self.ritz_lmp && !self.precondition {
            return Err(invalid("ritz_lmp requires precondition = true"));
        }
        if self.ritz_lmp
            && matches!(
                self.mode,
                PreconditionerMode::Spectral | PreconditionerMode::InverseSpectral
            )
        {
            log::warn!(
                "ritz_lmp has no effect with the {} preconditioner; only modes -2 and 2 carry a Ritz correction",
                self.mode
            );
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> crate::error::MinimizerError {
    MinimizerErrorKind::InvalidConfig(message.into()).into()
}
