//! Ritz pairs of the Lanczos tridiagonal matrix.
//!
//! The eigenvalues of `T(k)` (Ritz values) approximate the extreme eigenvalues
//! of the Hessian, and `beta[k+1] * zv[k, i]` bounds the residual of the i-th
//! Ritz pair. The decomposition is small (`k x k`) but must be bit-identical on
//! every rank, so it is computed by the leader alone and broadcast:
//! [`decompose`] is the pure numerical kernel, and
//! [`leader_decompose_and_broadcast`] the collective wrapper around it.

use faer::{Mat, Side};

use super::assemble_tridiagonal;
use crate::comm::Communicator;
use crate::error::{MinimizerErrorKind, MinimizerResult};

/// Eigen-decomposition of `T(k)` with eigenvalues in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct RitzDecomposition {
    /// Ritz values `Ritz[1..k]`, ascending.
    pub values: Vec<f64>,
    /// Column `i` is the unit eigenvector of `T(k)` for `values[i]`.
    pub vectors: Mat<f64>,
}

impl RitzDecomposition {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest Ritz value, or zero for an empty decomposition.
    pub fn max_value(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }

    /// The last component `zv[k, i]` of every eigenvector.
    pub fn last_components(&self) -> Vec<f64> {
        let k = self.len();
        (0..k).map(|i| self.vectors[(k - 1, i)]).collect()
    }

    /// Error bounds `|beta[k+1] * zv[k, i]|`, divided by the largest Ritz value
    /// when `relative` is set.
    pub fn error_bounds(&self, beta_next: f64, relative: bool) -> Vec<f64> {
        let scale = if relative && self.max_value() > 0.0 {
            self.max_value()
        } else {
            1.0
        };
        self.last_components()
            .into_iter()
            .map(|z| (beta_next * z).abs() / scale)
            .collect()
    }

    /// Eigenvector matrix in column-major order, for checkpoints and broadcast.
    pub fn vectors_col_major(&self) -> Vec<f64> {
        let k = self.len();
        let mut out = Vec::with_capacity(k * k);
        for j in 0..k {
            for i in 0..k {
                out.push(self.vectors[(i, j)]);
            }
        }
        out
    }
}

/// Status code for a malformed (non-finite) tridiagonal matrix.
pub const STATUS_INVALID_INPUT: i32 = -1;
/// Status code when the eigensolver failed to converge.
pub const STATUS_NO_CONVERGENCE: i32 = 1;

/// Computes the full eigen-decomposition of the symmetric tridiagonal `T(k)`.
///
/// On failure returns a nonzero status code in the style of LAPACK `info`.
pub fn decompose(diag: &[f64], off: &[f64]) -> Result<RitzDecomposition, i32> {
    let k = diag.len();
    if diag.iter().chain(off.iter()).any(|v| !v.is_finite()) {
        return Err(STATUS_INVALID_INPUT);
    }
    if k == 0 {
        return Ok(RitzDecomposition {
            values: Vec::new(),
            vectors: Mat::zeros(0, 0),
        });
    }

    let t_k = assemble_tridiagonal(diag, off);
    let evd = t_k
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|_| STATUS_NO_CONVERGENCE)?;
    let u = evd.U();
    let s = evd.S();

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| s[a].total_cmp(&s[b]));

    let values = order.iter().map(|&i| s[i]).collect();
    let vectors = Mat::from_fn(k, k, |i, j| u[(i, order[j])]);
    Ok(RitzDecomposition { values, vectors })
}

/// Decomposes `T(k)` on the leader and broadcasts status, values and vectors.
///
/// Every rank must call this with the same `k`. A nonzero status on the leader
/// becomes [`MinimizerErrorKind::EigensolverFailure`] on every rank.
pub fn leader_decompose_and_broadcast<C: Communicator>(
    comm: &C,
    diag: &[f64],
    off: &[f64],
) -> MinimizerResult<RitzDecomposition> {
    let k = diag.len();
    let local = if comm.is_leader() {
        Some(decompose(diag, off))
    } else {
        None
    };

    let status = match &local {
        Some(Err(status)) => *status,
        _ => 0,
    };
    let status = comm.broadcast_status(status)?;
    if status != 0 {
        return Err(MinimizerErrorKind::EigensolverFailure { status }.into());
    }

    let mut payload = vec![0.0; k + k * k];
    if let Some(Ok(decomposition)) = &local {
        payload[..k].copy_from_slice(&decomposition.values);
        payload[k..].copy_from_slice(&decomposition.vectors_col_major());
    }
    comm.broadcast(&mut payload)?;

    Ok(RitzDecomposition {
        values: payload[..k].to_vec(),
        vectors: Mat::from_fn(k, k, |i, j| payload[k + j * k + i]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SingleProcess, ThreadTeam};
    use approx::assert_relative_eq;

    #[test]
    fn test_decomposition_is_ascending_and_exact() {
        let diag = [2.0, 2.0, 2.0];
        let off = [-1.0, -1.0];
        let ritz = decompose(&diag, &off).unwrap();

        // Eigenvalues of the 1-D Laplacian stencil: 2 - 2 cos(j pi / 4).
        let sqrt2 = 2.0_f64.sqrt();
        assert_relative_eq!(ritz.values[0], 2.0 - sqrt2, epsilon = 1e-13);
        assert_relative_eq!(ritz.values[1], 2.0, epsilon = 1e-13);
        assert_relative_eq!(ritz.values[2], 2.0 + sqrt2, epsilon = 1e-13);

        let t = assemble_tridiagonal(&diag, &off);
        for i in 0..3 {
            let v = ritz.vectors.col(i);
            let tv = t.as_ref() * v;
            for r in 0..3 {
                assert_relative_eq!(tv[r], ritz.values[i] * v[r], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_error_bounds_scale_with_residual_coupling() {
        let ritz = decompose(&[3.0, 1.0], &[0.0]).unwrap();
        // Diagonal T: the eigenvector of 1.0 is e2, of 3.0 is e1.
        let bounds = ritz.error_bounds(0.5, false);
        assert_relative_eq!(bounds[0], 0.5, epsilon = 1e-15);
        assert_relative_eq!(bounds[1], 0.0, epsilon = 1e-15);
        let relative = ritz.error_bounds(0.5, true);
        assert_relative_eq!(relative[0], 0.5 / 3.0, epsilon = 1e-15);
    }

    #[test]
    fn test_non_finite_input_reports_status() {
        assert_eq!(
            decompose(&[1.0, f64::NAN], &[0.0]).unwrap_err(),
            STATUS_INVALID_INPUT
        );
        let err = leader_decompose_and_broadcast(&SingleProcess::new(), &[f64::INFINITY], &[])
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &MinimizerErrorKind::EigensolverFailure {
                status: STATUS_INVALID_INPUT
            }
        );
    }

    #[test]
    fn test_followers_receive_the_leader_decomposition() {
        let team = ThreadTeam::new(3);
        let results: Vec<RitzDecomposition> = std::thread::scope(|s| {
            let handles: Vec<_> = team
                .iter()
                .map(|member| {
                    s.spawn(move || {
                        // Followers pass garbage: only the leader's tables matter.
                        let diag = if member.is_leader() {
                            vec![4.0, 1.0]
                        } else {
                            vec![f64::NAN, f64::NAN]
                        };
                        leader_decompose_and_broadcast(member, &diag, &[0.5]).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for ritz in &results[1..] {
            assert_eq!(ritz, &results[0]);
        }
    }
}
