//! Thomas-algorithm solve of the Lanczos tridiagonal system.
//!
//! At inner loop `k` the conjugate-gradient coefficients `z` satisfy
//! `T(k) z = -QG[1..k]`, where `T(k)` has diagonal `delta[1..k]` and off-diagonal
//! `beta[2..k]`. Because `T(k)` is the projection of a positive-definite Hessian it
//! needs no pivoting; a non-positive pivot means the quadratic model is broken.
//! The system is re-solved from scratch every inner loop: `k` is small.

use thiserror::Error;

use crate::error::BreakdownCause;

/// Why a tridiagonal solve did not produce a solution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TridiagonalError {
    #[error("{0}")]
    Breakdown(BreakdownCause),

    #[error("T(k) of order {order} given {off} off-diagonal and {rhs} right-hand side entries")]
    Shape { order: usize, off: usize, rhs: usize },
}

/// Result of one forward elimination and back substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct TridiagonalSolution {
    /// Solution vector `z[1..k]`.
    pub z: Vec<f64>,
    /// Elimination factors; `gamma[0]` is unused and kept at zero.
    pub gamma: Vec<f64>,
}

/// Solves `T z = rhs` for the symmetric tridiagonal `T` given by `diag` and `off`.
///
/// `off[i]` couples rows `i` and `i + 1`, so `off` holds one entry less than
/// `diag` and `rhs` as many. Fails with [`TridiagonalError::Breakdown`] when a
/// pivot is not strictly positive and finite.
pub fn solve_tridiagonal(
    diag: &[f64],
    off: &[f64],
    rhs: &[f64],
) -> Result<TridiagonalSolution, TridiagonalError> {
    let k = diag.len();
    if rhs.len() != k || off.len() + 1 != k.max(1) {
        return Err(TridiagonalError::Shape {
            order: k,
            off: off.len(),
            rhs: rhs.len(),
        });
    }

    let mut z = vec![0.0; k];
    let mut gamma = vec![0.0; k];
    if k == 0 {
        return Ok(TridiagonalSolution { z, gamma });
    }

    // Forward elimination.
    let mut pivot = check_pivot(diag[0])?;
    z[0] = rhs[0] / pivot;
    for i in 1..k {
        gamma[i] = off[i - 1] / pivot;
        pivot = check_pivot(diag[i] - off[i - 1] * gamma[i])?;
        z[i] = (rhs[i] - off[i - 1] * z[i - 1]) / pivot;
    }

    // Back substitution.
    for i in (0..k - 1).rev() {
        z[i] -= gamma[i + 1] * z[i + 1];
    }

    Ok(TridiagonalSolution { z, gamma })
}

#[inline]
fn check_pivot(pivot: f64) -> Result<f64, TridiagonalError> {
    if pivot.is_finite() && pivot > 0.0 {
        Ok(pivot)
    } else {
        Err(TridiagonalError::Breakdown(BreakdownCause::NonPositivePivot(pivot)))
    }
}
