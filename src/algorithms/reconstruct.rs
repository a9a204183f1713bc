//! Recombination of converged Ritz vectors into Hessian eigenvectors.
//!
//! A Ritz vector of `T(k)` with components `zv[:, i]` approximates the Hessian
//! eigenvector `sum_rec zv[rec, i] q[rec]`. The recombination accumulates rounding
//! error, so each reconstructed vector is orthogonalized against the ones already
//! written (classical Gram-Schmidt) and renormalized before it is persisted. The
//! resulting orthonormal set is the basis of the limited-memory preconditioner in
//! later outer loops.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::ritz::RitzDecomposition;
use crate::comm::Communicator;
use crate::error::{BreakdownCause, MinimizerErrorKind, MinimizerResult};
use crate::state::VectorSpace;
use crate::store::{RecordId, VectorStore};

/// Converged Hessian eigenpairs of one outer loop, largest eigenvalue first.
///
/// The eigenvectors themselves live in the store at
/// `RecordId::hessian(outer, n)`, `n = 1..=values.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HessianSpectrum {
    pub outer: usize,
    /// Eigenvalue estimates, descending.
    pub values: Vec<f64>,
    /// Ritz error bound of each pair.
    pub errors: Vec<f64>,
    /// Ritz-LMP coupling `beta[N+1] * zv[N, i]` of each pair.
    pub couplings: Vec<f64>,
    /// Index of the persisted residual Lanczos vector `q[N+1]`, if it was stored.
    pub residual_index: Option<usize>,
}

impl HessianSpectrum {
    /// A spectrum without any pair; the preconditioner treats it as the identity.
    pub fn empty(outer: usize) -> Self {
        Self {
            outer,
            values: Vec::new(),
            errors: Vec::new(),
            couplings: Vec::new(),
            residual_index: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Reconstructs and persists the Hessian eigenvectors of the converged Ritz pairs.
///
/// `converged[i]` flags the pair with ascending index `i`; pairs are processed from
/// the largest Ritz value down. `beta_next` is `beta[N+1]`, and `residual_index` is
/// `Some(N + 1)` when `q[N+1]` was persisted. Each Lanczos vector is streamed once
/// per reconstructed pair.
#[allow(clippy::too_many_arguments)]
pub fn reconstruct_hessian_eigenvectors<C: Communicator, S: VectorStore>(
    space: &VectorSpace<C>,
    store: &mut S,
    outer: usize,
    ritz: &RitzDecomposition,
    errors: &[f64],
    converged: &[bool],
    beta_next: f64,
    residual_index: Option<usize>,
) -> MinimizerResult<HessianSpectrum> {
    let k = ritz.len();
    let last = ritz.last_components();
    let mut spectrum = HessianSpectrum::empty(outer);
    spectrum.residual_index = residual_index;

    for i in (0..k).rev().filter(|&i| converged[i]) {
        let mut h = space.zeros();
        for rec in 1..=k {
            let q_rec = store.load(RecordId::lanczos(outer, rec))?;
            h.axpy(ritz.vectors[(rec - 1, i)], &q_rec)?;
        }

        // Classical Gram-Schmidt: every factor is taken against the raw vector.
        let previous = spectrum.len();
        let mut factors = Vec::with_capacity(previous);
        let mut stored = Vec::with_capacity(previous);
        for n in 1..=previous {
            let h_n = store.load(RecordId::hessian(outer, n))?;
            factors.push(space.dot(&h, &h_n)?);
            stored.push(h_n);
        }
        for (s, h_n) in factors.iter().zip(&stored) {
            h.axpy(-s, h_n)?;
        }

        let norm = space.norm(&h)?;
        if !(norm.is_finite() && norm > 0.0) {
            return Err(MinimizerErrorKind::NumericalBreakdown {
                outer,
                inner: k,
                cause: BreakdownCause::VanishingNorm(norm),
            }
            .into());
        }
        h.scale(1.0 / norm);
        store.store(RecordId::hessian(outer, previous + 1), &h)?;

        spectrum.values.push(ritz.values[i]);
        spectrum.errors.push(errors[i]);
        spectrum.couplings.push(beta_next * last[i]);
    }

    if spectrum.is_empty() {
        warn!("outer {outer}: no Ritz pair converged, no Hessian eigenvectors written");
    } else {
        info!(
            "outer {outer}: wrote {} Hessian eigenvectors (largest {:.6e}, smallest {:.6e})",
            spectrum.len(),
            spectrum.values[0],
            spectrum.values[spectrum.len() - 1]
        );
    }
    Ok(spectrum)
}
