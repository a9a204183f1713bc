//! Limited-memory spectral preconditioner built from earlier outer loops.
//!
//! Each completed outer loop leaves an orthonormal set of Hessian eigenpairs
//! `(lambda_i, h_i)`. The preconditioner of a later outer loop is the product,
//! over those loops, of the rank-updated identities
//!
//! ```text
//! M = I + sum_i (mu_i - 1) h_i h_i^T,
//! ```
//!
//! where `mu_i` depends on the [`PreconditionerMode`]. The forward transform
//! (preconditioned "y" space to physical "v" space) runs the loops in increasing
//! order, the transposed transform in decreasing order. With the optional Ritz
//! correction each factor gains the asymmetric term `r_i h_i q^T`, built from the
//! residual Lanczos vector `q = q[N+1]` of its loop, so the forward transform and
//! its transpose are distinct operators.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::algorithms::reconstruct::HessianSpectrum;
use crate::comm::Communicator;
use crate::error::{MinimizerError, MinimizerErrorKind, MinimizerResult};
use crate::state::{StateVector, VectorSpace};
use crate::store::{RecordId, VectorStore};

/// How eigenvalue `lambda_i` is turned into the scaling `mu_i`.
///
/// Serialized as its integer code: `-1`, `1`, `-2` or `2`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum PreconditionerMode {
    /// Code `1`: `mu = 1 / lambda` (spectral LMP).
    Spectral,
    /// Code `-1`: `mu = lambda` (inverse spectral LMP).
    InverseSpectral,
    /// Code `2`: `mu = 1 / sqrt(lambda)` (square-root spectral LMP).
    #[default]
    SqrtSpectral,
    /// Code `-2`: `mu = sqrt(lambda)` (inverse square-root spectral LMP).
    InverseSqrtSpectral,
}

impl PreconditionerMode {
    pub fn code(self) -> i32 {
        match self {
            PreconditionerMode::Spectral => 1,
            PreconditionerMode::InverseSpectral => -1,
            PreconditionerMode::SqrtSpectral => 2,
            PreconditionerMode::InverseSqrtSpectral => -2,
        }
    }

    /// Scaling applied along an eigenvector of eigenvalue `lambda`.
    pub fn mu(self, lambda: f64) -> f64 {
        match self {
            PreconditionerMode::Spectral => 1.0 / lambda,
            PreconditionerMode::InverseSpectral => lambda,
            PreconditionerMode::SqrtSpectral => 1.0 / lambda.sqrt(),
            PreconditionerMode::InverseSqrtSpectral => lambda.sqrt(),
        }
    }

    /// The mode whose spectral factors invert this mode's factors.
    pub fn opposite(self) -> Self {
        match self {
            PreconditionerMode::Spectral => PreconditionerMode::InverseSpectral,
            PreconditionerMode::InverseSpectral => PreconditionerMode::Spectral,
            PreconditionerMode::SqrtSpectral => PreconditionerMode::InverseSqrtSpectral,
            PreconditionerMode::InverseSqrtSpectral => PreconditionerMode::SqrtSpectral,
        }
    }

    /// Whether eigenpairs are visited largest-first in the forward transform.
    fn largest_first(self) -> bool {
        self.code() > 0
    }

    /// Coefficient of the Ritz correction for coupling `c` and eigenvalue `lambda`.
    /// Only the square-root modes carry one.
    fn ritz_factor(self, coupling: f64, lambda: f64) -> f64 {
        match self {
            PreconditionerMode::SqrtSpectral => -coupling / lambda,
            PreconditionerMode::InverseSqrtSpectral => coupling / lambda.sqrt(),
            _ => 0.0,
        }
    }
}

impl TryFrom<i32> for PreconditionerMode {
    type Error = MinimizerError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(PreconditionerMode::Spectral),
            -1 => Ok(PreconditionerMode::InverseSpectral),
            2 => Ok(PreconditionerMode::SqrtSpectral),
            -2 => Ok(PreconditionerMode::InverseSqrtSpectral),
            other => Err(MinimizerErrorKind::InvalidConfig(format!(
                "preconditioner mode must be one of -2, -1, 1, 2, got {other}"
            ))
            .into()),
        }
    }
}

impl From<PreconditionerMode> for i32 {
    fn from(mode: PreconditionerMode) -> Self {
        mode.code()
    }
}

impl fmt::Display for PreconditionerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PreconditionerMode::Spectral => "spectral",
            PreconditionerMode::InverseSpectral => "inverse spectral",
            PreconditionerMode::SqrtSpectral => "square-root spectral",
            PreconditionerMode::InverseSqrtSpectral => "inverse square-root spectral",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Applies the product-form LMP of all preceding outer loops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preconditioner {
    mode: PreconditionerMode,
    ritz_lmp: bool,
}

impl Preconditioner {
    pub fn new(mode: PreconditionerMode, ritz_lmp: bool) -> Self {
        Self { mode, ritz_lmp }
    }

    pub fn mode(&self) -> PreconditionerMode {
        self.mode
    }

    pub fn ritz_lmp(&self) -> bool {
        self.ritz_lmp
    }

    /// Applies the preconditioner (or its transpose) in place.
    ///
    /// `spectra` holds the spectrum of every preceding outer loop in increasing
    /// outer-loop order. Forward maps y-space to v-space; transposed maps a
    /// v-space gradient to y-space.
    pub fn apply<C: Communicator, S: VectorStore>(
        &self,
        space: &VectorSpace<C>,
        store: &S,
        spectra: &[HessianSpectrum],
        x: &mut StateVector,
        transposed: bool,
    ) -> MinimizerResult<()> {
        apply_product(space, store, spectra, x, self.mode, self.ritz_lmp, transposed)
    }

    /// Undoes [`Preconditioner::apply`] with the same `transposed` flag.
    ///
    /// Uses the opposite mode in the opposite order, which inverts the spectral
    /// factors exactly. The Ritz correction is not inverted.
    pub fn apply_inverse<C: Communicator, S: VectorStore>(
        &self,
        space: &VectorSpace<C>,
        store: &S,
        spectra: &[HessianSpectrum],
        x: &mut StateVector,
        transposed: bool,
    ) -> MinimizerResult<()> {
        apply_product(
            space,
            store,
            spectra,
            x,
            self.mode.opposite(),
            false,
            !transposed,
        )
    }
}

fn apply_product<C: Communicator, S: VectorStore>(
    space: &VectorSpace<C>,
    store: &S,
    spectra: &[HessianSpectrum],
    x: &mut StateVector,
    mode: PreconditionerMode,
    ritz_lmp: bool,
    transposed: bool,
) -> MinimizerResult<()> {
    let loops: Box<dyn Iterator<Item = &HessianSpectrum>> = if transposed {
        Box::new(spectra.iter().rev())
    } else {
        Box::new(spectra.iter())
    };

    for spectrum in loops {
        let m = spectrum.len();
        // Forward: largest-first for positive modes. Transposed: reversed.
        let ascending_records = mode.largest_first() != transposed;
        let order: Vec<usize> = if ascending_records {
            (1..=m).collect()
        } else {
            (1..=m).rev().collect()
        };

        let residual = match (ritz_lmp, spectrum.residual_index) {
            (true, Some(index)) if mode.ritz_factor(1.0, 1.0) != 0.0 => {
                Some(store.load(RecordId::lanczos(spectrum.outer, index))?)
            }
            _ => None,
        };

        debug!(
            "preconditioner {}{}: outer loop {}, {m} eigenpairs{}",
            mode,
            if transposed { " transposed" } else { "" },
            spectrum.outer,
            if residual.is_some() { " + Ritz correction" } else { "" }
        );

        for n in order {
            let h = store.load(RecordId::hessian(spectrum.outer, n))?;
            let lambda = spectrum.values[n - 1];
            if !(lambda.is_finite() && lambda > 0.0) {
                return Err(MinimizerErrorKind::InvalidInput(format!(
                    "Hessian eigenvalue {n} of outer loop {} is {lambda}",
                    spectrum.outer
                ))
                .into());
            }
            let hx = space.dot(&h, x)?;
            let mut fac = (mode.mu(lambda) - 1.0) * hx;

            match &residual {
                Some(q) if !transposed => {
                    let r = mode.ritz_factor(spectrum.couplings[n - 1], lambda);
                    fac += r * space.dot(q, x)?;
                    x.axpy(fac, &h)?;
                }
                Some(q) => {
                    let r = mode.ritz_factor(spectrum.couplings[n - 1], lambda);
                    x.axpy(fac, &h)?;
                    x.axpy(r * hx, q)?;
                }
                None => x.axpy(fac, &h)?,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_codes_round_trip() {
        for code in [-2, -1, 1, 2] {
            let mode = PreconditionerMode::try_from(code).unwrap();
            assert_eq!(i32::from(mode), code);
            assert_eq!(mode.opposite().code(), -code);
        }
        assert!(PreconditionerMode::try_from(0).is_err());
        assert!(PreconditionerMode::try_from(3).is_err());
    }

    #[test]
    fn test_mu_values() {
        assert_eq!(PreconditionerMode::InverseSpectral.mu(4.0), 4.0);
        assert_eq!(PreconditionerMode::Spectral.mu(4.0), 0.25);
        assert_eq!(PreconditionerMode::InverseSqrtSpectral.mu(4.0), 2.0);
        assert_eq!(PreconditionerMode::SqrtSpectral.mu(4.0), 0.5);
        for mode in [
            PreconditionerMode::Spectral,
            PreconditionerMode::SqrtSpectral,
        ] {
            assert!((mode.mu(7.0) * mode.opposite().mu(7.0) - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn test_ritz_factor_only_for_square_root_modes() {
        assert_eq!(PreconditionerMode::Spectral.ritz_factor(1.0, 4.0), 0.0);
        assert_eq!(PreconditionerMode::InverseSpectral.ritz_factor(1.0, 4.0), 0.0);
        assert_eq!(PreconditionerMode::SqrtSpectral.ritz_factor(1.0, 4.0), -0.25);
        assert_eq!(
            PreconditionerMode::InverseSqrtSpectral.ritz_factor(1.0, 4.0),
            0.5
        );
    }
}
