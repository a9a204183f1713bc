//! Lanczos recurrence with full reorthogonalization against the persisted basis.
//!
//! Inside a conjugate-gradient minimization the normalized gradients are the
//! Lanczos vectors of the Hessian, and they satisfy the three-term recurrence
//!
//! ```text
//! H q[k] = beta[k+1] q[k+1] + delta[k] q[k] + beta[k] q[k-1].
//! ```
//!
//! In exact arithmetic orthogonality to the older vectors comes for free; in
//! floating point it is lost quickly once Ritz values converge. Every new vector
//! is therefore Gram-Schmidt orthogonalized against the whole stored basis. The
//! basis is never held in memory: each vector is streamed back from the
//! [`VectorStore`] one at a time, so a step costs O(n) memory and O(k) reads.

use log::{debug, warn};

use super::breakdown_tolerance;
use crate::comm::Communicator;
use crate::error::{BreakdownCause, MinimizerErrorKind, MinimizerResult};
use crate::state::{StateVector, VectorSpace};
use crate::store::{RecordId, VectorStore};

/// Output of one [`LanczosGenerator::extend`] call.
#[derive(Debug, Clone)]
pub struct LanczosStep {
    /// Norm of the orthogonalized vector: `Gnorm` at `k = 0`, `beta[k+1]` afterwards.
    pub norm: f64,
    /// The new basis vector `q[k+1]`. `None` when the Krylov space was exhausted
    /// at the final inner loop, in which case nothing was persisted.
    pub next: Option<StateVector>,
    /// `QG[k+1] = Gnorm * <q[1], q[k+1]>`; equal to `Gnorm` at `k = 0`.
    pub qg: f64,
    /// Gram-Schmidt factors `s[rec] = <g, q[rec]>`, for `rec = k` down to `1`.
    pub reorthogonalization: Vec<f64>,
    /// Largest `|<q[k+1], q[rec]>|` over the stored basis, measured after normalization.
    pub orthogonality: f64,
}

/// Extends the persisted Lanczos basis of one outer loop by one vector per call.
///
/// Every inner product is a collective reduction, so all ranks must drive their
/// generators through the same sequence of calls.
pub struct LanczosGenerator<'a, C: Communicator, S: VectorStore> {
    space: &'a VectorSpace<C>,
    store: &'a mut S,
    outer: usize,
    n_inner: usize,
    orthogonality_tolerance: f64,
}

impl<'a, C: Communicator, S: VectorStore> LanczosGenerator<'a, C, S> {
    pub fn new(
        space: &'a VectorSpace<C>,
        store: &'a mut S,
        outer: usize,
        n_inner: usize,
        orthogonality_tolerance: f64,
    ) -> Self {
        Self {
            space,
            store,
            outer,
            n_inner,
            orthogonality_tolerance,
        }
    }

    /// Produces and persists `q[k+1]` from the raw vector `g`.
    ///
    /// At `k = 0`, `g` is the gradient at the origin. For `k > 0` it is the Hessian
    /// product `H q[k]`, `delta_k` is `delta[k]` and `beta_k` is `beta[k]`
    /// (zero at `k = 1`, where there is no `q[0]`). `gnorm` is ignored at `k = 0`.
    ///
    /// A vanishing norm is a [`MinimizerErrorKind::NumericalBreakdown`], except at
    /// `k == Ninner` where it means the Krylov space is exhausted: the norm is
    /// still returned as `beta[Ninner+1]` but no vector is stored.
    pub fn extend(
        &mut self,
        k: usize,
        g: StateVector,
        delta_k: f64,
        beta_k: f64,
        gnorm: f64,
    ) -> MinimizerResult<LanczosStep> {
        let outer = self.outer;
        let mut g = g;

        // Three-term recurrence.
        if k > 0 {
            let qk = self.store.load(RecordId::lanczos(outer, k))?;
            g.axpy(-delta_k, &qk)?;
        }
        if k > 1 {
            let qk_prev = self.store.load(RecordId::lanczos(outer, k - 1))?;
            g.axpy(-beta_k, &qk_prev)?;
        }

        // Full reorthogonalization, newest vector first.
        let mut reorthogonalization = Vec::with_capacity(k);
        for rec in (1..=k).rev() {
            let q_rec = self.store.load(RecordId::lanczos(outer, rec))?;
            let s = self.space.dot(&g, &q_rec)?;
            g.axpy(-s, &q_rec)?;
            reorthogonalization.push(s);
        }
        if !reorthogonalization.is_empty() {
            debug!(
                "outer {outer}, inner {k}: Gram-Schmidt factors {:?}",
                reorthogonalization
            );
        }

        let norm = self.space.norm(&g)?;
        let exhausted = self.check_norm(k, norm, delta_k, beta_k)?;
        if exhausted {
            debug!(
                "outer {outer}, inner {k}: Krylov space exhausted (beta = {norm:.3e}), final vector not stored"
            );
            return Ok(LanczosStep {
                norm,
                next: None,
                qg: 0.0,
                reorthogonalization,
                orthogonality: 0.0,
            });
        }

        g.scale(1.0 / norm);
        self.store.store(RecordId::lanczos(outer, k + 1), &g)?;

        if k == 0 {
            return Ok(LanczosStep {
                norm,
                next: Some(g),
                qg: norm,
                reorthogonalization,
                orthogonality: 0.0,
            });
        }

        // Re-verify orthogonality and project onto q[1] for QG[k+1].
        let mut orthogonality: f64 = 0.0;
        let mut qg = 0.0;
        for rec in 1..=k {
            let q_rec = self.store.load(RecordId::lanczos(outer, rec))?;
            let overlap = self.space.dot(&g, &q_rec)?;
            if rec == 1 {
                qg = gnorm * overlap;
            }
            orthogonality = orthogonality.max(overlap.abs());
        }
        if orthogonality > self.orthogonality_tolerance {
            warn!(
                "outer {outer}, inner {k}: Lanczos vector {} lost orthogonality (max |<q, q_rec>| = {orthogonality:.3e})",
                k + 1
            );
        }

        Ok(LanczosStep {
            norm,
            next: Some(g),
            qg,
            reorthogonalization,
            orthogonality,
        })
    }

    /// Returns `Ok(true)` when the space is exhausted at the final inner loop.
    fn check_norm(&self, k: usize, norm: f64, delta_k: f64, beta_k: f64) -> MinimizerResult<bool> {
        let vanishing = if k == 0 {
            !(norm.is_finite() && norm > 0.0)
        } else {
            let scale = delta_k.abs().max(beta_k.abs());
            !norm.is_finite() || norm <= breakdown_tolerance() * scale
        };

        if !vanishing {
            Ok(false)
        } else if k > 0 && k == self.n_inner && norm.is_finite() {
            Ok(true)
        } else {
            Err(MinimizerErrorKind::NumericalBreakdown {
                outer: self.outer,
                inner: k,
                cause: BreakdownCause::VanishingNorm(norm),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::comm::SingleProcess;
    use crate::state::{Geometry, StateLayout};
    use crate::store::InMemoryStore;

    fn space(n: usize) -> VectorSpace<SingleProcess> {
        VectorSpace::new(
            Arc::new(Geometry::unmasked(&StateLayout::single(n))),
            SingleProcess::new(),
        )
    }

    fn vector(space: &VectorSpace<SingleProcess>, flat: &[f64]) -> StateVector {
        StateVector::from_flat(space.layout(), flat).unwrap()
    }

    #[test]
    fn test_first_step_normalizes_gradient() {
        let space = space(3);
        let mut store = InMemoryStore::new();
        let g0 = vector(&space, &[0.0, 3.0, 4.0]);

        let step = LanczosGenerator::new(&space, &mut store, 1, 4, 1e-8)
            .extend(0, g0, 0.0, 0.0, 0.0)
            .unwrap();

        assert_eq!(step.norm, 5.0);
        assert_eq!(step.qg, 5.0);
        assert_eq!(
            store.load(RecordId::lanczos(1, 1)).unwrap().to_flat(),
            vec![0.0, 0.6, 0.8]
        );
    }

    #[test]
    fn test_second_vector_is_orthonormal_to_first() {
        let space = space(3);
        let mut store = InMemoryStore::new();
        let mut generator = LanczosGenerator::new(&space, &mut store, 1, 4, 1e-8);
        generator
            .extend(0, vector(&space, &[1.0, 0.0, 0.0]), 0.0, 0.0, 0.0)
            .unwrap();
        // H = [[2,1,0],[1,3,1],[0,1,4]]: H q1 = (2, 1, 0), delta1 = 2.
        let step = generator
            .extend(1, vector(&space, &[2.0, 1.0, 0.0]), 2.0, 0.0, 1.0)
            .unwrap();

        assert!((step.norm - 1.0).abs() < 1e-15);
        assert!(step.qg.abs() < 1e-15);
        assert!(step.orthogonality < 1e-15);
        let q2 = store.load(RecordId::lanczos(1, 2)).unwrap();
        assert_eq!(q2.to_flat(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_zero_gradient_is_a_breakdown() {
        let space = space(2);
        let mut store = InMemoryStore::new();
        let err = LanczosGenerator::new(&space, &mut store, 3, 4, 1e-8)
            .extend(0, vector(&space, &[0.0, 0.0]), 0.0, 0.0, 0.0)
            .unwrap_err();
        assert_eq!(err.breakdown_at(), Some((3, 0)));
    }

    #[test]
    fn test_exhaustion_at_final_loop_is_accepted() {
        let space = space(1);
        let mut store = InMemoryStore::new();
        let mut generator = LanczosGenerator::new(&space, &mut store, 1, 1, 1e-8);
        generator
            .extend(0, vector(&space, &[2.0]), 0.0, 0.0, 0.0)
            .unwrap();
        // H = 3 on a one-dimensional space: H q1 = 3 q1 leaves nothing behind.
        let step = generator
            .extend(1, vector(&space, &[3.0]), 3.0, 0.0, 2.0)
            .unwrap();

        assert!(step.next.is_none());
        assert_eq!(step.norm, 0.0);
        assert!(!store.contains(RecordId::lanczos(1, 2)));
    }
}
