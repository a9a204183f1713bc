//! The gradient oracle: the one call into the tangent-linear and adjoint models.
//!
//! The minimization never sees the Hessian. All it needs is the gradient of the
//! quadratic cost at a given increment, which in a 4D-Var system is one
//! tangent-linear integration followed by one adjoint integration. This
//! "matrix-free" seam lets the engine be driven by the full ocean model in
//! production and by a small dense [`QuadraticOracle`] in tests.

use faer::{Col, Mat, Scale};

use crate::error::{MinimizerErrorKind, MinimizerResult};
use crate::state::{StateLayout, StateVector};

/// Evaluates the cost-function gradient at a physical-space increment.
///
/// The returned gradient must have the increment's layout. In a distributed run
/// each rank passes its own tile and receives its own tile of the gradient.
pub trait GradientOracle {
    fn evaluate_gradient(&mut self, increment: &StateVector) -> MinimizerResult<StateVector>;
}

impl<F> GradientOracle for F
where
    F: FnMut(&StateVector) -> MinimizerResult<StateVector>,
{
    fn evaluate_gradient(&mut self, increment: &StateVector) -> MinimizerResult<StateVector> {
        self(increment)
    }
}

/// Gradient of `f(x) = 0.5 x^T A x - b^T x` for a dense symmetric `A`: `A x - b`.
///
/// The state is flattened in layout order to meet the matrix.
#[derive(Debug, Clone)]
pub struct QuadraticOracle {
    a: Mat<f64>,
    b: Col<f64>,
    layout: StateLayout,
    evaluations: usize,
}

impl QuadraticOracle {
    /// `a` must be square and both `a` and `b` must match the layout length.
    pub fn new(a: Mat<f64>, b: Col<f64>, layout: StateLayout) -> MinimizerResult<Self> {
        let n = layout.len();
        if a.nrows() != n || a.ncols() != n || b.nrows() != n {
            return Err(MinimizerErrorKind::LayoutMismatch(format!(
                "quadratic oracle of size {}x{} with rhs {} cannot act on a layout of {n} entries",
                a.nrows(),
                a.ncols(),
                b.nrows()
            ))
            .into());
        }
        Ok(Self {
            a,
            b,
            layout,
            evaluations: 0,
        })
    }

    pub fn matrix(&self) -> &Mat<f64> {
        &self.a
    }

    pub fn rhs(&self) -> &Col<f64> {
        &self.b
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Number of gradient evaluations performed so far.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// `f(x) = 0.5 x^T A x - b^T x`.
    pub fn cost(&self, x: &StateVector) -> MinimizerResult<f64> {
        let x = self.to_col(x)?;
        let residual = (&self.a * &x) * Scale(0.5) - &self.b;
        Ok(x.transpose() * &residual)
    }

    fn to_col(&self, x: &StateVector) -> MinimizerResult<Col<f64>> {
        if x.layout() != self.layout {
            return Err(MinimizerErrorKind::LayoutMismatch(format!(
                "increment layout {:?} does not match the oracle layout {:?}",
                x.layout(),
                self.layout
            ))
            .into());
        }
        let flat = x.to_flat();
        Ok(Col::from_fn(flat.len(), |i| flat[i]))
    }
}

impl GradientOracle for QuadraticOracle {
    fn evaluate_gradient(&mut self, increment: &StateVector) -> MinimizerResult<StateVector> {
        let x = self.to_col(increment)?;
        let gradient = &self.a * &x - &self.b;
        self.evaluations += 1;
        let flat = gradient
            .as_ref()
            .try_as_col_major()
            .ok_or_else(|| {
                MinimizerErrorKind::InvalidInput("gradient column is not contiguous".to_string())
            })?
            .as_slice();
        StateVector::from_flat(&self.layout, flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_gradient_is_residual() {
        let a: Mat<f64> = mat![[2.0, -1.0, 0.0], [-1.0, 2.0, -1.0], [0.0, -1.0, 2.0]];
        let b = Col::from_fn(3, |i| (i + 1) as f64);
        let layout = StateLayout::single(3);
        let mut oracle = QuadraticOracle::new(a, b, layout.clone()).unwrap();

        let x = StateVector::from_flat(&layout, &[1.0, 2.0, 3.0]).unwrap();
        let g = oracle.evaluate_gradient(&x).unwrap();
        // A x = (0, 0, 4); minus b = (-1, -2, 1).
        assert_eq!(g.to_flat(), vec![-1.0, -2.0, 1.0]);
        assert_eq!(oracle.evaluations(), 1);
        // 0.5 * (0 + 0 + 12) - (1 + 4 + 9) = -8.
        assert_eq!(oracle.cost(&x).unwrap(), -8.0);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let a: Mat<f64> = mat![[1.0, 0.0], [0.0, 1.0]];
        let b = Col::from_fn(2, |_| 1.0);
        assert!(QuadraticOracle::new(a, b, StateLayout::single(3)).is_err());
    }

    #[test]
    fn test_closures_are_oracles() {
        let layout = StateLayout::single(2);
        let mut doubling = |x: &StateVector| -> MinimizerResult<StateVector> { Ok(x.scaled(2.0)) };
        let x = StateVector::from_flat(&layout, &[1.0, -1.0]).unwrap();
        assert_eq!(
            doubling.evaluate_gradient(&x).unwrap().to_flat(),
            vec![2.0, -2.0]
        );
    }
}
