//! Synthetic symmetric positive-definite problems with controlled spectra.
//!
//! A quadratic cost `f(x) = 0.5 x^T A x - b^T x` stands in for the linearized
//! 4D-Var cost: its Hessian is `A` and its gradient oracle is exact. Problems are
//! built from a prescribed spectrum, rotated by a random orthogonal matrix, so
//! the true eigenvalues are known when Ritz values are compared against them.
//! All generators take a caller-supplied RNG; tests seed it for reproducibility.

use faer::{Col, Mat, Side};
use rand::Rng;

use crate::algorithms::ritz::STATUS_NO_CONVERGENCE;
use crate::error::{MinimizerErrorKind, MinimizerResult};
use crate::oracle::QuadraticOracle;
use crate::state::StateLayout;

/// A quadratic test problem with a known spectrum and minimizer.
#[derive(Debug, Clone)]
pub struct SyntheticProblem {
    /// The Hessian `A`, symmetric positive-definite.
    pub a: Mat<f64>,
    /// The right-hand side `b`; the gradient at the origin is `-b`.
    pub b: Col<f64>,
    /// Eigenvalues of `A`, ascending.
    pub eigenvalues: Vec<f64>,
}

impl SyntheticProblem {
    /// A dense problem with the given eigenvalues and a random right-hand side.
    pub fn with_spectrum<R: Rng>(eigenvalues: &[f64], rng: &mut R) -> MinimizerResult<Self> {
        let n = eigenvalues.len();
        let a = matrix_with_spectrum(eigenvalues, rng)?;
        let b = random_vector(n, rng);
        let mut eigenvalues = eigenvalues.to_vec();
        eigenvalues.sort_by(f64::total_cmp);
        Ok(Self { a, b, eigenvalues })
    }

    /// A diagonal problem: the eigenvectors are the unit vectors.
    pub fn diagonal<R: Rng>(eigenvalues: &[f64], rng: &mut R) -> Self {
        let n = eigenvalues.len();
        let a = Mat::from_fn(n, n, |i, j| if i == j { eigenvalues[i] } else { 0.0 });
        let b = random_vector(n, rng);
        let mut eigenvalues = eigenvalues.to_vec();
        eigenvalues.sort_by(f64::total_cmp);
        Self { a, b, eigenvalues }
    }

    pub fn dim(&self) -> usize {
        self.b.nrows()
    }

    /// The exact minimizer `A^-1 b`, from the eigen-decomposition of `A`.
    pub fn minimizer(&self) -> MinimizerResult<Col<f64>> {
        let evd = self
            .a
            .as_ref()
            .self_adjoint_eigen(Side::Lower)
            .map_err(|_| MinimizerErrorKind::EigensolverFailure {
                status: STATUS_NO_CONVERGENCE,
            })?;
        let u = evd.U();
        let s = evd.S();
        let utb = u.transpose() * self.b.as_ref();
        let scaled = Col::from_fn(self.dim(), |i| utb[i] / s[i]);
        Ok(u * scaled.as_ref())
    }

    /// A gradient oracle for this problem over a single-component layout.
    pub fn oracle(&self) -> MinimizerResult<QuadraticOracle> {
        QuadraticOracle::new(self.a.clone(), self.b.clone(), StateLayout::single(self.dim()))
    }
}

/// `n` eigenvalues evenly spaced on `[min, max]`, ascending.
pub fn linear_spectrum(n: usize, min: f64, max: f64) -> Vec<f64> {
    (0..n)
        .map(|i| min + (max - min) / (n - 1).max(1) as f64 * i as f64)
        .collect()
}

/// `n` eigenvalues geometrically spaced on `[min, max]`, ascending.
pub fn geometric_spectrum(n: usize, min: f64, max: f64) -> Vec<f64> {
    let ratio = (max / min).powf(1.0 / (n - 1).max(1) as f64);
    (0..n).map(|i| min * ratio.powi(i as i32)).collect()
}

/// Entries uniform on `[-1, 1)`.
pub fn random_vector<R: Rng>(n: usize, rng: &mut R) -> Col<f64> {
    Col::from_fn(n, |_| 2.0 * rng.random::<f64>() - 1.0)
}

/// A random orthogonal matrix: the eigenvectors of a random symmetric matrix.
pub fn random_orthogonal<R: Rng>(n: usize, rng: &mut R) -> MinimizerResult<Mat<f64>> {
    let m = Mat::from_fn(n, n, |_, _| rng.random::<f64>() - 0.5);
    let sym = Mat::from_fn(n, n, |i, j| m[(i, j)] + m[(j, i)]);
    let evd = sym
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|_| MinimizerErrorKind::EigensolverFailure {
            status: STATUS_NO_CONVERGENCE,
        })?;
    Ok(evd.U().to_owned())
}

/// `U diag(eigenvalues) U^T` for a random orthogonal `U`, symmetrized exactly.
pub fn matrix_with_spectrum<R: Rng>(eigenvalues: &[f64], rng: &mut R) -> MinimizerResult<Mat<f64>> {
    let n = eigenvalues.len();
    let u = random_orthogonal(n, rng)?;
    let scaled = Mat::from_fn(n, n, |i, j| u[(i, j)] * eigenvalues[j]);
    let a = scaled.as_ref() * u.transpose();
    Ok(Mat::from_fn(n, n, |i, j| 0.5 * (a[(i, j)] + a[(j, i)])))
}

/// `M M^T + shift I` for a random `M`; positive-definite for `shift > 0`.
pub fn random_spd<R: Rng>(n: usize, shift: f64, rng: &mut R) -> Mat<f64> {
    let m = Mat::from_fn(n, n, |_, _| rng.random::<f64>() - 0.5);
    let mmt = m.as_ref() * m.transpose();
    Mat::from_fn(n, n, |i, j| {
        let sym = 0.5 * (mmt[(i, j)] + mmt[(j, i)]);
        if i == j { sym + shift } else { sym }
    })
}

/// `a + scale * E` for a random symmetric `E` with entries in `[-1, 1)`.
pub fn symmetric_perturbation<R: Rng>(a: &Mat<f64>, scale: f64, rng: &mut R) -> Mat<f64> {
    let n = a.nrows();
    let e = Mat::from_fn(n, n, |_, _| 2.0 * rng.random::<f64>() - 1.0);
    Mat::from_fn(n, n, |i, j| a[(i, j)] + scale * 0.5 * (e[(i, j)] + e[(j, i)]))
}
