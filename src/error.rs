//! This module defines the custom error types for the library.
//!
//! Every fault that can stop an inner-loop minimization is collected in a single
//! enum, [`MinimizerErrorKind`], wrapped by the public [`MinimizerError`]. All of
//! them are fatal: the orchestrator propagates them upward, raises the run-wide
//! abort flag, and never retries an inner loop.
//!
//! [`thiserror`] gives the idiomatic `Display`/`Error` implementations. The faer
//! eigen-decomposition error does not implement [`std::error::Error`], so the
//! eigensolver reports an integer status instead, mirroring a LAPACK `info` code.
use std::fmt;
use thiserror::Error;

use crate::store::RecordId;

/// Represents all possible errors that can occur during an inner-loop minimization.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(transparent)]
pub struct MinimizerError(#[from] MinimizerErrorKind);

impl MinimizerError {
    /// Returns the underlying error kind.
    pub fn kind(&self) -> &MinimizerErrorKind {
        &self.0
    }

    /// Returns the `(outer, inner)` loop at which a numerical breakdown occurred,
    /// or `None` for every other kind of error.
    pub fn breakdown_at(&self) -> Option<(usize, usize)> {
        match self.0 {
            MinimizerErrorKind::NumericalBreakdown { outer, inner, .. } => Some((outer, inner)),
            _ => None,
        }
    }
}

/// The numerical condition that invalidated the quadratic model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakdownCause {
    /// `delta[k] = <q[k], Hq[k]>` was not positive.
    NonPositiveCurvature(f64),
    /// The orthogonalized gradient had (near) zero norm before the final inner loop.
    VanishingNorm(f64),
    /// The tridiagonal eigen-decomposition produced a negative Ritz value.
    NegativeRitzValue(f64),
    /// The Thomas elimination hit a non-positive pivot.
    NonPositivePivot(f64),
}

impl fmt::Display for BreakdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakdownCause::NonPositiveCurvature(v) => {
                write!(f, "non-positive Hessian curvature (delta = {v:e})")
            }
            BreakdownCause::VanishingNorm(v) => {
                write!(f, "vanishing Lanczos vector norm ({v:e})")
            }
            BreakdownCause::NegativeRitzValue(v) => write!(f, "negative Ritz value ({v:e})"),
            BreakdownCause::NonPositivePivot(v) => {
                write!(f, "non-positive tridiagonal pivot ({v:e})")
            }
        }
    }
}

/// Distinct kinds of errors raised by the minimization engine.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MinimizerErrorKind {
    /// The quadratic-model assumption was violated; the current outer loop is abandoned.
    #[error("Numerical breakdown at outer loop {outer}, inner loop {inner}: {cause}.")]
    NumericalBreakdown {
        outer: usize,
        inner: usize,
        cause: BreakdownCause,
    },

    /// The leader's tridiagonal eigensolver returned a nonzero status.
    #[error("Tridiagonal eigensolver failed with status {status}.")]
    EigensolverFailure { status: i32 },

    /// A vector record could not be written, read, or was missing.
    #[error("Persistence failure on {record}: {message}")]
    PersistenceFailure { record: String, message: String },

    /// A collective reduction or broadcast failed.
    #[error("Communication failure: {0}")]
    CommunicationFailure(String),

    /// Two state vectors with different component sets or lengths were combined.
    #[error("State layout mismatch: {0}")]
    LayoutMismatch(String),

    /// The run configuration is not usable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A call violated the orchestrator's sequencing contract.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A previous fatal condition raised the run-wide abort flag.
    #[error("Minimization aborted by an earlier fatal condition.")]
    Aborted,
}

impl MinimizerErrorKind {
    pub(crate) fn persistence(record: RecordId, message: impl ToString) -> Self {
        MinimizerErrorKind::PersistenceFailure {
            record: record.to_string(),
            message: message.to_string(),
        }
    }
}

/// Crate-wide result alias.
pub type MinimizerResult<T> = Result<T, MinimizerError>;
