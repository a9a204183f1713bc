//! Numerical kernels of one inner-loop step.
//!
//! Each submodule implements one stage of the Lanczos/conjugate-gradient step
//! driven by [`crate::minimizer::Minimizer`]:
//!
//! - [`hessian`]: the Hessian-vector product recovered from a gradient evaluation,
//!   and the curvature `delta[k]`.
//! - [`lanczos`]: the three-term recurrence with full Gram-Schmidt
//!   reorthogonalization against the persisted basis.
//! - [`tridiagonal`]: the Thomas solve of `T(k) z = -QG` for the CG coefficients.
//! - [`ritz`]: the leader-computed eigen-decomposition of `T(k)` and its error bounds.
//! - [`reconstruct`]: recombination of converged Ritz vectors into orthonormal
//!   Hessian eigenvectors.
//!
//! The kernels never raise the run-wide abort flag themselves; they return errors
//! and leave termination to the orchestrator.

pub mod hessian;
pub mod lanczos;
pub mod reconstruct;
pub mod ritz;
pub mod tridiagonal;

/// Relative threshold below which a Lanczos norm counts as zero.
///
/// A new basis vector whose norm falls below `breakdown_tolerance() * scale`,
/// where `scale` is the magnitude of the current tridiagonal entries, carries no
/// information that survives rounding: the Krylov subspace is numerically invariant.
#[inline]
pub fn breakdown_tolerance() -> f64 {
    f64::EPSILON.sqrt()
}

/// Assembles the dense symmetric `k x k` matrix `T(k)` from its diagonal and
/// off-diagonal.
///
/// `off[i]` couples rows `i` and `i + 1`, so `off.len()` must be `diag.len() - 1`.
pub fn assemble_tridiagonal(diag: &[f64], off: &[f64]) -> faer::Mat<f64> {
    let k = diag.len();
    let mut t_k = faer::Mat::zeros(k, k);
    for (i, &d) in diag.iter().enumerate() {
        t_k[(i, i)] = d;
    }
    for (i, &b) in off.iter().enumerate().take(k.saturating_sub(1)) {
        t_k[(i, i + 1)] = b;
        t_k[(i + 1, i)] = b;
    }
    t_k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_tridiagonal_is_symmetric() {
        let t = assemble_tridiagonal(&[4.0, 3.0, 2.0], &[1.0, 0.5]);
        assert_eq!(t.nrows(), 3);
        assert_eq!(t[(0, 1)], 1.0);
        assert_eq!(t[(1, 0)], 1.0);
        assert_eq!(t[(2, 1)], 0.5);
        assert_eq!(t[(0, 2)], 0.0);
        assert_eq!(t[(2, 2)], 2.0);
    }

    #[test]
    fn test_breakdown_tolerance_is_small_and_positive() {
        let tol = breakdown_tolerance();
        assert!(tol > 0.0 && tol < 1e-7);
    }
}
