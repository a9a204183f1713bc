//! Hessian-vector products recovered from gradient evaluations.
//!
//! The quadratic cost has gradient `grad(x) = g0 + H x`, so one tangent-linear +
//! adjoint integration started from the Lanczos vector `q[k]` yields
//! `H q[k] = grad(q[k]) - grad(0)`. The gradient at the origin is only kept in
//! normalized form (it is the first Lanczos vector, `grad(0) = Gnorm * q[1]`), so
//! it is rescaled here.

use crate::comm::Communicator;
use crate::error::{BreakdownCause, MinimizerErrorKind, MinimizerResult};
use crate::state::{StateVector, VectorSpace};
use crate::store::{RecordId, VectorStore};

/// Output of [`estimate_curvature`].
#[derive(Debug, Clone)]
pub struct HessianProduct {
    /// `mask ⊙ (grad(q[k]) - Gnorm * q[1])`.
    pub product: StateVector,
    /// `delta[k] = <q[k], H q[k]>`, strictly positive.
    pub delta: f64,
}

/// Forms `H q[k]` from the gradient evaluated at `q[k]` and measures the curvature.
///
/// `gradient` must already be expressed in the space the Lanczos vectors live in
/// (the preconditioned space when preconditioning is active). Fails with
/// [`MinimizerErrorKind::NumericalBreakdown`] when `delta[k] <= 0`.
pub fn estimate_curvature<C: Communicator, S: VectorStore>(
    space: &VectorSpace<C>,
    store: &S,
    outer: usize,
    k: usize,
    gnorm: f64,
    gradient: StateVector,
) -> MinimizerResult<HessianProduct> {
    if k == 0 {
        return Err(MinimizerErrorKind::InvalidInput(
            "the Hessian is only sampled from inner loop 1 onwards".to_string(),
        )
        .into());
    }

    let q1 = store.load(RecordId::lanczos(outer, 1))?;
    let mut product = gradient;
    product.axpy(-gnorm, &q1)?;
    space.apply_mask(&mut product)?;

    let qk = if k == 1 {
        q1
    } else {
        store.load(RecordId::lanczos(outer, k))?
    };
    let delta = space.dot(&qk, &product)?;

    if !(delta.is_finite() && delta > 0.0) {
        return Err(MinimizerErrorKind::NumericalBreakdown {
            outer,
            inner: k,
            cause: BreakdownCause::NonPositiveCurvature(delta),
        }
        .into());
    }

    log::debug!("outer {outer}, inner {k}: curvature delta = {delta:.6e}");
    Ok(HessianProduct { product, delta })
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

    #[test]
    fn test_product_removes_gradient_at_origin() {
        let space = space(2);
        let layout = space.layout().clone();
        let mut store = InMemoryStore::new();
        // g0 = (3, 4), Gnorm = 5, q1 = (0.6, 0.8).
        let q1 = StateVector::from_flat(&layout, &[0.6, 0.8]).unwrap();
        store.store(RecordId::lanczos(1, 1), &q1).unwrap();

        // H = diag(2, 1): grad(q1) = g0 + H q1 = (4.2, 4.8).
        let gradient = StateVector::from_flat(&layout, &[4.2, 4.8]).unwrap();
        let hv = estimate_curvature(&space, &store, 1, 1, 5.0, gradient).unwrap();

        let flat = hv.product.to_flat();
        assert!((flat[0] - 1.2).abs() < 1e-14);
        assert!((flat[1] - 0.8).abs() < 1e-14);
        assert!((hv.delta - (0.72 + 0.64)).abs() < 1e-14);
    }

    #[test]
    fn test_negative_curvature_is_a_breakdown() {
        let space = space(1);
        let layout = space.layout().clone();
        let mut store = InMemoryStore::new();
        store
            .store(
                RecordId::lanczos(2, 1),
                &StateVector::from_flat(&layout, &[1.0]).unwrap(),
            )
            .unwrap();
        // grad(q1) - Gnorm q1 = 0.5 - 1.0 < 0.
        let gradient = StateVector::from_flat(&layout, &[0.5]).unwrap();
        let err = estimate_curvature(&space, &store, 2, 1, 1.0, gradient).unwrap_err();
        assert_eq!(err.breakdown_at(), Some((2, 1)));
    }
}
