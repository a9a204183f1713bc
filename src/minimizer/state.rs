//! Serializable bookkeeping of a minimization run.
//!
//! All scalar tables live here rather than in the minimizer itself, so the whole
//! run can be checkpointed after every inner loop and restarted from the last
//! good step. Tables are append-only within an outer loop and start empty in the
//! next one.

use serde::{Deserialize, Serialize};

use crate::algorithms::reconstruct::HessianSpectrum;
use crate::error::{MinimizerErrorKind, MinimizerResult};

/// Quadratic cost split into its background and observation terms.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostFunctionValue {
    pub total: f64,
    pub background: f64,
    pub observation: f64,
}

impl CostFunctionValue {
    /// Splits `total` given the background term; the remainder is the observation term.
    pub fn from_total(total: f64, background: f64) -> Self {
        Self {
            total,
            background,
            observation: total - background,
        }
    }
}

/// Ritz pairs of the latest `T(k)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RitzEstimate {
    /// Inner loop `k` the estimate belongs to.
    pub inner: usize,
    /// Ascending Ritz values.
    pub values: Vec<f64>,
    /// Error bounds, relative to the largest value at the final inner loop.
    pub errors: Vec<f64>,
    pub converged: Vec<bool>,
    /// `k x k` eigenvector matrix of `T(k)`, column-major.
    pub vectors: Vec<f64>,
}

impl RitzEstimate {
    pub fn converged_count(&self) -> usize {
        self.converged.iter().filter(|&&c| c).count()
    }
}

/// Tables of one outer loop.
///
/// Indexing is zero-based: `delta[i]` holds `delta[i+1]`, `beta[i]` holds
/// `beta[i+2]` (so `beta` ends with the residual coupling `beta[k+1]`), and
/// `qg[i]` holds `QG[i+1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OuterLoopRecord {
    /// Outer loop index, 1-based.
    pub outer: usize,
    /// Final inner index of this loop.
    pub n_inner: usize,
    /// Cost at the start of the outer loop (zero increment).
    pub cost0: f64,
    /// Sum of earlier outer-loop increments, flattened in layout order.
    pub background_offset: Option<Vec<f64>>,
    /// Norm of the gradient at the zero increment.
    pub gnorm: f64,
    pub delta: Vec<f64>,
    pub beta: Vec<f64>,
    pub qg: Vec<f64>,
    /// Thomas elimination factors of the latest solve.
    pub gamma: Vec<f64>,
    /// CG coefficients `z_u` of the latest solve.
    pub zu: Vec<f64>,
    /// Gradient-norm reduction `|g_k| / Gnorm` for inner loops `1..=k`.
    pub greduc: Vec<f64>,
    /// Cost after each inner loop, starting with inner loop 0.
    pub costs: Vec<CostFunctionValue>,
    /// Largest measured loss of orthogonality per inner loop.
    pub orthogonality: Vec<f64>,
    pub ritz: Option<RitzEstimate>,
    /// The inner index the next step must carry.
    pub next_inner: usize,
    /// The Krylov space was exhausted at the final inner loop.
    pub krylov_exhausted: bool,
    /// Converged Hessian eigenpairs, written at the final inner loop.
    pub spectrum: Option<HessianSpectrum>,
}

impl OuterLoopRecord {
    pub fn new(outer: usize, n_inner: usize, cost0: f64, background_offset: Option<Vec<f64>>) -> Self {
        Self {
            outer,
            n_inner,
            cost0,
            background_offset,
            gnorm: 0.0,
            delta: Vec::new(),
            beta: Vec::new(),
            qg: Vec::new(),
            gamma: Vec::new(),
            zu: Vec::new(),
            greduc: Vec::new(),
            costs: Vec::new(),
            orthogonality: Vec::new(),
            ritz: None,
            next_inner: 0,
            krylov_exhausted: false,
            spectrum: None,
        }
    }

    /// Whether the final inner loop has run.
    pub fn is_complete(&self) -> bool {
        self.next_inner > self.n_inner
    }

    /// Cost after the latest completed inner loop.
    pub fn latest_cost(&self) -> Option<CostFunctionValue> {
        self.costs.last().copied()
    }

    /// Off-diagonal of `T(k)` for the current `k = delta.len()`.
    pub fn off_diagonal(&self) -> &[f64] {
        let k = self.delta.len();
        &self.beta[..k.saturating_sub(1)]
    }
}

/// The whole run: one record per started outer loop.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizationState {
    pub loops: Vec<OuterLoopRecord>,
}

impl MinimizationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outer loop currently being minimized.
    pub fn current(&self) -> MinimizerResult<&OuterLoopRecord> {
        self.loops.last().ok_or_else(no_outer_loop)
    }

    pub fn current_mut(&mut self) -> MinimizerResult<&mut OuterLoopRecord> {
        self.loops.last_mut().ok_or_else(no_outer_loop)
    }

    pub fn outer_loop(&self, outer: usize) -> Option<&OuterLoopRecord> {
        outer.checked_sub(1).and_then(|i| self.loops.get(i))
    }

    /// Hessian spectra of the outer loops preceding `outer`, in increasing order.
    ///
    /// Fails when one of them finished without computing a spectrum.
    pub fn spectra_before(&self, outer: usize) -> MinimizerResult<Vec<HessianSpectrum>> {
        self.loops
            .iter()
            .take(outer.saturating_sub(1))
            .map(|record| {
                record.spectrum.clone().ok_or_else(|| {
                    MinimizerErrorKind::InvalidInput(format!(
                        "outer loop {} left no Hessian spectrum to precondition with",
                        record.outer
                    ))
                    .into()
                })
            })
            .collect()
    }
}

fn no_outer_loop() -> crate::error::MinimizerError {
    MinimizerErrorKind::InvalidInput("no outer loop has been started".to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectra_before_requires_every_earlier_loop() {
        let mut state = MinimizationState::new();
        let mut first = OuterLoopRecord::new(1, 3, 0.0, None);
        first.next_inner = 4;
        first.spectrum = Some(HessianSpectrum::empty(1));
        state.loops.push(first);
        state.loops.push(OuterLoopRecord::new(2, 3, 0.0, None));

        assert_eq!(state.spectra_before(2).unwrap().len(), 1);
        assert!(state.spectra_before(1).unwrap().is_empty());
        assert!(state.spectra_before(3).is_err());
        assert_eq!(state.current().unwrap().outer, 2);
        assert!(state.outer_loop(1).unwrap().is_complete());
        assert!(state.outer_loop(0).is_none());
    }

    #[test]
    fn test_state_survives_bincode() {
        let mut record = OuterLoopRecord::new(1, 2, 4.5, Some(vec![1.0, -1.0]));
        record.delta = vec![2.0, 3.0];
        record.beta = vec![0.5, 1e-3];
        record.costs.push(CostFunctionValue::from_total(4.5, 1.0));
        let state = MinimizationState {
            loops: vec![record],
        };

        let bytes = bincode::serialize(&state).unwrap();
        let back: MinimizationState = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.loops[0].off_diagonal(), &[0.5]);
        assert_eq!(back.loops[0].costs[0].observation, 3.5);
    }
}
