//! The inner-product space the minimization works in.

use std::sync::Arc;

use super::{Geometry, StateLayout, StateVector};
use crate::comm::Communicator;
use crate::error::{MinimizerErrorKind, MinimizerResult};

/// Couples the local grid geometry with a communicator to form the global,
/// masked, metric-weighted inner product.
///
/// Every call to [`VectorSpace::dot`] or [`VectorSpace::norm`] is a collective
/// reduction: all ranks must make the same sequence of calls.
#[derive(Debug)]
pub struct VectorSpace<C: Communicator> {
    geometry: Arc<Geometry>,
    comm: C,
}

impl<C: Communicator> VectorSpace<C> {
    pub fn new(geometry: Arc<Geometry>, comm: C) -> Self {
        Self { geometry, comm }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn layout(&self) -> &StateLayout {
        self.geometry.layout()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// A zero vector of this space's layout.
    pub fn zeros(&self) -> StateVector {
        StateVector::zeros(self.layout())
    }

    /// Global `<a, b>`. Collective.
    ///
    /// A non-finite result means one of the operands carried a NaN or an
    /// overflow into the reduction and is reported as [`MinimizerErrorKind::InvalidInput`].
    pub fn dot(&self, a: &StateVector, b: &StateVector) -> MinimizerResult<f64> {
        let local = self.geometry.local_dot(a, b)?;
        let global = self.comm.all_reduce_sum(local)?;
        if global.is_finite() {
            Ok(global)
        } else {
            Err(MinimizerErrorKind::InvalidInput(format!(
                "non-finite inner product ({global}); an operand holds NaN or overflows"
            ))
            .into())
        }
    }

    /// Global `sqrt(<a, a>)`. Collective.
    pub fn norm(&self, a: &StateVector) -> MinimizerResult<f64> {
        Ok(self.dot(a, a)?.max(0.0).sqrt())
    }

    /// Zeroes masked points of `v`. Local.
    pub fn apply_mask(&self, v: &mut StateVector) -> MinimizerResult<()> {
        self.geometry.apply_mask(v)
    }
}
