//! The inner-loop orchestrator: one call to [`Minimizer::step`] is one inner loop.
//!
//! Each step receives the gradient of the cost function evaluated at the
//! increment the previous step emitted (the zero increment at inner loop 0) and
//! walks through the phases of [`InnerPhase`]:
//!
//! 1. map the gradient to the preconditioned space and sample the Hessian,
//! 2. extend the Lanczos basis,
//! 3. on request, decompose `T(k)` and reject a negative Ritz value,
//! 4. solve `T(k) z = -QG` and update the gradient and the cost,
//! 5. at the final loop, rebuild the Hessian eigenvectors from the Ritz pairs,
//! 6. emit the next increment for the tangent-linear model,
//! 7. checkpoint the scalar tables.
//!
//! The step works on a copy of the current [`OuterLoopRecord`] and commits it
//! only once every phase has succeeded, so a failed step leaves the last
//! checkpoint untouched. Any failure raises the run-wide abort flag: every later
//! step returns [`MinimizerErrorKind::Aborted`], and ranks blocked in a
//! collective are released with the same error.

pub mod state;

pub use state::*;

use std::fmt;

use log::{debug, error, info};

use crate::algorithms::hessian::estimate_curvature;
use crate::algorithms::lanczos::LanczosGenerator;
use crate::algorithms::reconstruct::{HessianSpectrum, reconstruct_hessian_eigenvectors};
use crate::algorithms::ritz::leader_decompose_and_broadcast;
use crate::algorithms::tridiagonal::{TridiagonalError, solve_tridiagonal};
use crate::comm::Communicator;
use crate::config::MinimizerConfig;
use crate::diagnostics::{DiagnosticsSink, StepDiagnostics};
use crate::error::{BreakdownCause, MinimizerErrorKind, MinimizerResult};
use crate::oracle::GradientOracle;
use crate::preconditioner::Preconditioner;
use crate::state::{StateVector, VectorSpace};
use crate::store::{RecordId, VectorStore};

/// Phases of one inner-loop step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerPhase {
    AwaitHessian,
    ComputeLanczos,
    EigenDecomposition,
    SolveTridiagonal,
    UpdateGradient,
    EmitNextInitialCondition,
    UpdateDirection,
    Checkpoint,
}

impl fmt::Display for InnerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InnerPhase::AwaitHessian => "await Hessian",
            InnerPhase::ComputeLanczos => "compute Lanczos vector",
            InnerPhase::SolveTridiagonal => "solve tridiagonal system",
            InnerPhase::UpdateDirection => "update direction",
            InnerPhase::UpdateGradient => "update gradient and cost",
            InnerPhase::EigenDecomposition => "eigen-decomposition",
            InnerPhase::EmitNextInitialCondition => "emit next initial condition",
            InnerPhase::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// Inputs of a new outer loop.
#[derive(Debug, Clone)]
pub struct OuterLoopSetup {
    /// Outer loop index, 1-based; must be the next one in sequence.
    pub outer: usize,
    /// Cost at the zero increment of this outer loop.
    pub cost0: f64,
    /// Sum of the increments of the earlier outer loops, in physical space.
    /// Only enters the background term of the cost split.
    pub background_offset: Option<StateVector>,
}

impl OuterLoopSetup {
    pub fn new(outer: usize, cost0: f64) -> Self {
        Self {
            outer,
            cost0,
            background_offset: None,
        }
    }

    pub fn with_background_offset(mut self, offset: StateVector) -> Self {
        self.background_offset = Some(offset);
        self
    }
}

/// What one inner-loop step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub outer: usize,
    pub inner: usize,
    /// Increment at which the caller evaluates the next gradient; after the
    /// final inner loop, the outer-loop increment itself.
    pub next_increment: StateVector,
    pub cost: CostFunctionValue,
    /// `|g_k| / Gnorm`; absent at inner loop 0.
    pub greduc: Option<f64>,
    /// The final inner loop has run.
    pub finished: bool,
}

/// Result of a complete outer loop.
#[derive(Debug, Clone)]
pub struct OuterLoopSummary {
    pub outer: usize,
    /// Physical-space increment minimizing the quadratic cost over the Krylov space.
    pub increment: StateVector,
    pub cost: CostFunctionValue,
    pub greduc: Option<f64>,
    /// Ritz values of the final `T(N)`, ascending, when they were computed.
    pub ritz_values: Option<Vec<f64>>,
    /// Number of Hessian eigenpairs kept for preconditioning later outer loops.
    pub converged_pairs: usize,
}

/// Drives the preconditioned Lanczos/CG minimization of one process's tile.
///
/// In a distributed run every rank owns one `Minimizer` with its own store and
/// sink, and all ranks call the same methods in the same order.
pub struct Minimizer<C: Communicator, S: VectorStore, D: DiagnosticsSink> {
    config: MinimizerConfig,
    space: VectorSpace<C>,
    store: S,
    sink: D,
    preconditioner: Preconditioner,
    state: MinimizationState,
}

impl<C: Communicator, S: VectorStore, D: DiagnosticsSink> Minimizer<C, S, D> {
    /// Creates a minimizer for a fresh run.
    pub fn new(config: MinimizerConfig, space: VectorSpace<C>, store: S, sink: D) -> MinimizerResult<Self> {
        Self::resume(config, space, store, sink, MinimizationState::new())
    }

    /// Continues a run from a checkpointed state.
    ///
    /// `store` must hold every vector record the checkpointed steps wrote.
    pub fn resume(
        config: MinimizerConfig,
        space: VectorSpace<C>,
        store: S,
        sink: D,
        state: MinimizationState,
    ) -> MinimizerResult<Self> {
        config.validate()?;
        if state.loops.len() > config.n_outer {
            return Err(MinimizerErrorKind::InvalidInput(format!(
                "checkpoint holds {} outer loops but the run is configured for {}",
                state.loops.len(),
                config.n_outer
            ))
            .into());
        }
        for (i, record) in state.loops.iter().enumerate() {
            if record.outer != i + 1 || record.n_inner != config.n_inner {
                return Err(MinimizerErrorKind::InvalidInput(format!(
                    "checkpointed outer loop {} ({} inner loops) does not fit a run of {} inner loops at position {}",
                    record.outer,
                    record.n_inner,
                    config.n_inner,
                    i + 1
                ))
                .into());
            }
        }
        if let Some(record) = state.loops.last() {
            info!(
                "resuming at outer loop {}, inner loop {}",
                record.outer, record.next_inner
            );
        }

        let preconditioner = Preconditioner::new(config.mode, config.ritz_lmp);
        Ok(Self {
            config,
            space,
            store,
            sink,
            preconditioner,
            state,
        })
    }

    pub fn config(&self) -> &MinimizerConfig {
        &self.config
    }

    pub fn space(&self) -> &VectorSpace<C> {
        &self.space
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sink(&self) -> &D {
        &self.sink
    }

    pub fn state(&self) -> &MinimizationState {
        &self.state
    }

    pub fn preconditioner(&self) -> &Preconditioner {
        &self.preconditioner
    }

    /// Releases the vector store, e.g. to hand it to a resumed minimizer.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Starts the next outer loop with empty tables.
    pub fn begin_outer_loop(&mut self, setup: OuterLoopSetup) -> MinimizerResult<()> {
        if self.space.comm().abort_raised() {
            return Err(MinimizerErrorKind::Aborted.into());
        }
        let expected = self.state.loops.len() + 1;
        if setup.outer != expected {
            return Err(MinimizerErrorKind::InvalidInput(format!(
                "outer loop {} requested, expected {expected}",
                setup.outer
            ))
            .into());
        }
        if setup.outer > self.config.n_outer {
            return Err(MinimizerErrorKind::InvalidInput(format!(
                "outer loop {} exceeds the configured {} outer loops",
                setup.outer, self.config.n_outer
            ))
            .into());
        }
        if let Some(previous) = self.state.loops.last() {
            if !previous.is_complete() {
                return Err(MinimizerErrorKind::InvalidInput(format!(
                    "outer loop {} stopped at inner loop {} of {}",
                    previous.outer, previous.next_inner, previous.n_inner
                ))
                .into());
            }
        }
        let offset = match &setup.background_offset {
            Some(offset) => {
                self.space.geometry().check_vector(offset)?;
                Some(offset.to_flat())
            }
            None => None,
        };

        let preconditioned = self.config.precondition && setup.outer > 1;
        info!(
            "outer loop {}/{}: {} inner loops, J0 = {:.10e}{}",
            setup.outer,
            self.config.n_outer,
            self.config.n_inner,
            setup.cost0,
            if preconditioned {
                format!(", preconditioner {}", self.preconditioner.mode())
            } else {
                String::new()
            }
        );
        self.state.loops.push(OuterLoopRecord::new(
            setup.outer,
            self.config.n_inner,
            setup.cost0,
            offset,
        ));
        Ok(())
    }

    /// Runs inner loop `inner` of the current outer loop.
    ///
    /// # Arguments
    /// * `inner`: The inner loop index; must be exactly the next one in sequence.
    /// * `gradient`: The physical-space gradient at the increment emitted by the
    ///   previous step (at the zero increment for `inner == 0`).
    ///
    /// # Returns
    /// The next increment to evaluate, the cost estimate, and whether the outer
    /// loop is finished. Every error is fatal and raises the abort flag.
    pub fn step(&mut self, inner: usize, gradient: StateVector) -> MinimizerResult<StepOutcome> {
        if self.space.comm().abort_raised() {
            return Err(MinimizerErrorKind::Aborted.into());
        }
        self.advance(inner, gradient).inspect_err(|err| {
            error!("inner loop {inner} failed: {err}");
            self.space.comm().raise_abort();
        })
    }

    /// Increment the next gradient must be evaluated at, recomputed from the
    /// checkpointed tables and stored vectors.
    ///
    /// Zero before inner loop 0, the preconditioned `q[k+1]` while the loop runs,
    /// and the outer-loop increment once it is complete.
    pub fn pending_increment(&self) -> MinimizerResult<StateVector> {
        let record = self.state.current()?;
        if record.next_inner == 0 {
            return Ok(self.space.zeros());
        }
        let outer = record.outer;
        let preconditioned = self.config.precondition && outer > 1;
        let spectra = if preconditioned {
            self.state.spectra_before(outer)?
        } else {
            Vec::new()
        };

        let mut increment = if record.is_complete() {
            let mut x = self.space.zeros();
            for (rec, z) in (1..).zip(&record.zu) {
                let q = self.store.load(RecordId::lanczos(outer, rec))?;
                x.axpy(*z, &q)?;
            }
            x
        } else {
            let mut d = self.store.load(RecordId::lanczos(outer, record.next_inner))?;
            self.space.apply_mask(&mut d)?;
            d
        };
        if preconditioned {
            self.preconditioner
                .apply(&self.space, &self.store, &spectra, &mut increment, false)?;
        }
        Ok(increment)
    }

    /// Runs a complete outer loop: the gradient at the zero increment, then one
    /// oracle call per inner loop.
    ///
    /// # Arguments
    /// * `setup`: Index, starting cost, and background offset of the outer loop.
    /// * `oracle`: The tangent-linear + adjoint gradient evaluation.
    ///
    /// # Returns
    /// The outer-loop increment and its summary.
    pub fn minimize<O: GradientOracle>(
        &mut self,
        setup: OuterLoopSetup,
        oracle: &mut O,
    ) -> MinimizerResult<OuterLoopSummary> {
        self.begin_outer_loop(setup)?;
        self.finish_outer_loop(oracle)
    }

    /// Runs the remaining inner loops of the current outer loop.
    pub fn finish_outer_loop<O: GradientOracle>(
        &mut self,
        oracle: &mut O,
    ) -> MinimizerResult<OuterLoopSummary> {
        let mut increment = self.pending_increment()?;
        loop {
            let record = self.state.current()?;
            if record.is_complete() {
                break;
            }
            let inner = record.next_inner;
            let gradient = oracle.evaluate_gradient(&increment).inspect_err(|err| {
                error!("gradient evaluation for inner loop {inner} failed: {err}");
                self.space.comm().raise_abort();
            })?;
            increment = self.step(inner, gradient)?.next_increment;
        }

        let record = self.state.current()?;
        Ok(OuterLoopSummary {
            outer: record.outer,
            increment,
            cost: record.latest_cost().unwrap_or_default(),
            greduc: record.greduc.last().copied(),
            ritz_values: record.ritz.as_ref().map(|ritz| ritz.values.clone()),
            converged_pairs: record.spectrum.as_ref().map_or(0, HessianSpectrum::len),
        })
    }

    fn advance(&mut self, k: usize, gradient: StateVector) -> MinimizerResult<StepOutcome> {
        let mut record = self.state.current()?.clone();
        let outer = record.outer;
        let n_inner = record.n_inner;
        if record.is_complete() {
            return Err(MinimizerErrorKind::InvalidInput(format!(
                "outer loop {outer} already ran its {n_inner} inner loops"
            ))
            .into());
        }
        if k != record.next_inner {
            return Err(MinimizerErrorKind::InvalidInput(format!(
                "outer loop {outer} expects inner loop {}, got {k}",
                record.next_inner
            ))
            .into());
        }
        self.space.geometry().check_vector(&gradient)?;

        let preconditioned = self.config.precondition && outer > 1;
        let spectra = if preconditioned {
            self.state.spectra_before(outer)?
        } else {
            Vec::new()
        };
        let space = &self.space;
        let store = &mut self.store;
        let preconditioner = &self.preconditioner;

        phase(outer, k, InnerPhase::AwaitHessian);
        let mut g = gradient;
        space.apply_mask(&mut g)?;
        if preconditioned {
            preconditioner.apply(space, &*store, &spectra, &mut g, true)?;
        }
        let (raw, delta_k, beta_k) = if k == 0 {
            (g, 0.0, 0.0)
        } else {
            let hv = estimate_curvature(space, &*store, outer, k, record.gnorm, g)?;
            let beta_k = if k > 1 { record.beta[k - 2] } else { 0.0 };
            (hv.product, hv.delta, beta_k)
        };

        phase(outer, k, InnerPhase::ComputeLanczos);
        let lanczos = LanczosGenerator::new(
            space,
            &mut *store,
            outer,
            n_inner,
            self.config.orthogonality_tolerance,
        )
        .extend(k, raw, delta_k, beta_k, record.gnorm)?;
        if k == 0 {
            record.gnorm = lanczos.norm;
            record.qg = vec![lanczos.qg];
        } else {
            record.delta.push(delta_k);
            record.beta.push(lanczos.norm);
            record.qg.push(lanczos.qg);
        }
        record.orthogonality.push(lanczos.orthogonality);
        record.krylov_exhausted = lanczos.next.is_none();

        // An indefinite T(k) is reported by its spectrum before the solve trips
        // over a non-positive pivot.
        let ritz = if k > 0 && self.config.needs_ritz() {
            phase(outer, k, InnerPhase::EigenDecomposition);
            let ritz = leader_decompose_and_broadcast(
                space.comm(),
                &record.delta,
                record.off_diagonal(),
            )?;
            if let Some(&min) = ritz.values.first().filter(|v| **v < 0.0) {
                return Err(breakdown(outer, k, BreakdownCause::NegativeRitzValue(min)));
            }
            Some(ritz)
        } else {
            None
        };

        let background_offset = match &record.background_offset {
            Some(flat) => Some(StateVector::from_flat(space.layout(), flat)?),
            None => None,
        };
        let mut x_v = space.zeros();
        let cost = if k == 0 {
            CostFunctionValue::from_total(
                record.cost0,
                background_cost(space, &x_v, background_offset.as_ref())?,
            )
        } else {
            phase(outer, k, InnerPhase::SolveTridiagonal);
            let rhs: Vec<f64> = record.qg[..k].iter().map(|qg| -qg).collect();
            let solution = solve_tridiagonal(&record.delta, record.off_diagonal(), &rhs)
                .map_err(|err| match err {
                    TridiagonalError::Breakdown(cause) => breakdown(outer, k, cause),
                    shape => MinimizerErrorKind::InvalidInput(shape.to_string()).into(),
                })?;
            record.gamma = solution.gamma;
            record.zu = solution.z;

            phase(outer, k, InnerPhase::UpdateGradient);
            // x = sum z[rec] q[rec];  g = Gnorm q[1] - sum QG[rec] q[rec] + beta[k+1] z[k] q[k+1].
            let q1 = store.load(RecordId::lanczos(outer, 1))?;
            let mut x_y = q1.scaled(record.zu[0]);
            let mut g_new = q1.scaled(record.gnorm - record.qg[0]);
            for rec in 2..=k {
                let q_rec = store.load(RecordId::lanczos(outer, rec))?;
                x_y.axpy(record.zu[rec - 1], &q_rec)?;
                g_new.axpy(-record.qg[rec - 1], &q_rec)?;
            }
            if let Some(q_next) = &lanczos.next {
                g_new.axpy(record.beta[k - 1] * record.zu[k - 1], q_next)?;
            }
            let greduc = space.norm(&g_new)? / record.gnorm;
            record.greduc.push(greduc);

            let total = record.cost0 + 0.5 * record.gnorm * space.dot(&x_y, &q1)?;
            x_v = x_y;
            if preconditioned {
                preconditioner.apply(space, &*store, &spectra, &mut x_v, false)?;
            }
            CostFunctionValue::from_total(
                total,
                background_cost(space, &x_v, background_offset.as_ref())?,
            )
        };

        if let Some(ritz) = ritz {
            let final_loop = k == n_inner;
            let errors = ritz.error_bounds(record.beta[k - 1], final_loop);
            let converged: Vec<bool> = errors
                .iter()
                .map(|err| *err <= self.config.ritz_max_err)
                .collect();
            debug!(
                "outer {outer}, inner {k}: Ritz values {:?}, error bounds {:?}",
                ritz.values, errors
            );

            if final_loop {
                let residual_index = lanczos.next.is_some().then_some(n_inner + 1);
                record.spectrum = Some(reconstruct_hessian_eigenvectors(
                    space,
                    &mut *store,
                    outer,
                    &ritz,
                    &errors,
                    &converged,
                    record.beta[k - 1],
                    residual_index,
                )?);
            }
            record.ritz = Some(RitzEstimate {
                inner: k,
                vectors: ritz.vectors_col_major(),
                values: ritz.values,
                errors,
                converged,
            });
        }

        phase(outer, k, InnerPhase::EmitNextInitialCondition);
        let finished = k == n_inner;
        let next_increment = match lanczos.next {
            Some(q_next) if !finished => {
                phase(outer, k, InnerPhase::UpdateDirection);
                let mut d = q_next;
                space.apply_mask(&mut d)?;
                if preconditioned {
                    preconditioner.apply(space, &*store, &spectra, &mut d, false)?;
                }
                d
            }
            _ => x_v,
        };

        phase(outer, k, InnerPhase::Checkpoint);
        record.costs.push(cost);
        record.next_inner = k + 1;
        let diagnostics = StepDiagnostics {
            outer,
            inner: k,
            gnorm: record.gnorm,
            delta: record.delta.last().copied(),
            beta: record.beta.last().copied(),
            greduc: record.greduc.last().copied(),
            cost_total: cost.total,
            cost_background: cost.background,
            cost_observation: cost.observation,
            orthogonality: record.orthogonality.last().copied().unwrap_or(0.0),
            ritz_min: record.ritz.as_ref().and_then(|r| r.values.first().copied()),
            ritz_max: record.ritz.as_ref().and_then(|r| r.values.last().copied()),
            converged_pairs: record.ritz.as_ref().map(RitzEstimate::converged_count),
        };
        let greduc = diagnostics.greduc;
        *self.state.current_mut()? = record;
        self.sink.record(&diagnostics)?;
        self.sink.checkpoint(&self.state)?;

        match greduc {
            Some(greduc) => info!(
                "outer {outer}, inner {k}: J = {:.10e} (Jb = {:.6e}, Jo = {:.6e}), greduc = {greduc:.6e}",
                cost.total, cost.background, cost.observation
            ),
            None => info!(
                "outer {outer}, inner {k}: J = {:.10e}, Gnorm = {:.6e}",
                cost.total, diagnostics.gnorm
            ),
        }

        Ok(StepOutcome {
            outer,
            inner: k,
            next_increment,
            cost,
            greduc,
            finished,
        })
    }
}

/// `Jb = 0.5 * |x_v + offset|^2`. Collective.
fn background_cost<C: Communicator>(
    space: &VectorSpace<C>,
    x_v: &StateVector,
    offset: Option<&StateVector>,
) -> MinimizerResult<f64> {
    let total = match offset {
        Some(offset) => StateVector::add(x_v, offset, 1.0, 1.0)?,
        None => x_v.clone(),
    };
    Ok(0.5 * space.dot(&total, &total)?)
}

fn breakdown(outer: usize, inner: usize, cause: BreakdownCause) -> crate::error::MinimizerError {
    MinimizerErrorKind::NumericalBreakdown {
        outer,
        inner,
        cause,
    }
    .into()
}

fn phase(outer: usize, inner: usize, phase: InnerPhase) {
    debug!("outer {outer}, inner {inner}: {phase}");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::comm::SingleProcess;
    use crate::diagnostics::MemorySink;
    use crate::oracle::QuadraticOracle;
    use crate::state::{Geometry, StateLayout};
    use crate::store::InMemoryStore;
    use faer::{Col, Mat, mat};

    type TestMinimizer = Minimizer<SingleProcess, InMemoryStore, MemorySink>;

    fn minimizer(n: usize, config: MinimizerConfig) -> TestMinimizer {
        let space = VectorSpace::new(
            Arc::new(Geometry::unmasked(&StateLayout::single(n))),
            SingleProcess::new(),
        );
        Minimizer::new(config, space, InMemoryStore::new(), MemorySink::default()).unwrap()
    }

    fn oracle() -> QuadraticOracle {
        let a: Mat<f64> = mat![[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]];
        let b = Col::from_fn(3, |i| [1.0, -2.0, 0.5][i]);
        QuadraticOracle::new(a, b, StateLayout::single(3)).unwrap()
    }

    #[test]
    fn test_step_rejects_out_of_order_inner_loops() {
        let config = MinimizerConfig {
            n_inner: 3,
            ..MinimizerConfig::default()
        };
        let mut m = minimizer(3, config);
        m.begin_outer_loop(OuterLoopSetup::new(1, 0.0)).unwrap();
        let mut oracle = oracle();
        let g0 = oracle.evaluate_gradient(&m.space().zeros()).unwrap();

        let err = m.step(1, g0).unwrap_err();
        assert!(matches!(err.kind(), MinimizerErrorKind::InvalidInput(_)));
        // The failure is fatal for the whole run.
        assert!(m.space().comm().abort_raised());
        let g0 = oracle.evaluate_gradient(&m.space().zeros()).unwrap();
        assert_eq!(m.step(0, g0).unwrap_err().kind(), &MinimizerErrorKind::Aborted);
    }

    #[test]
    fn test_outer_loops_must_be_sequential() {
        let config = MinimizerConfig {
            n_outer: 2,
            n_inner: 2,
            ..MinimizerConfig::default()
        };
        let mut m = minimizer(3, config);
        assert!(m.begin_outer_loop(OuterLoopSetup::new(2, 0.0)).is_err());
        m.begin_outer_loop(OuterLoopSetup::new(1, 0.0)).unwrap();
        // Loop 1 has not run yet.
        assert!(m.begin_outer_loop(OuterLoopSetup::new(2, 0.0)).is_err());
    }

    #[test]
    fn test_full_outer_loop_records_every_step() {
        let config = MinimizerConfig {
            n_inner: 3,
            ..MinimizerConfig::default()
        };
        let mut m = minimizer(3, config);
        let mut oracle = oracle();
        let summary = m
            .minimize(OuterLoopSetup::new(1, 0.0), &mut oracle)
            .unwrap();

        assert_eq!(oracle.evaluations(), 4);
        assert_eq!(m.sink().rows.len(), 4);
        let record = m.state().current().unwrap();
        assert!(record.is_complete());
        assert_eq!(record.delta.len(), 3);
        assert_eq!(record.beta.len(), 3);
        assert!(record.krylov_exhausted);
        assert_eq!(m.sink().last_checkpoint.as_ref(), Some(m.state()));

        // Three inner loops span the whole 3-D space: the increment is A^-1 b.
        let x = summary.increment.to_flat();
        let residual = oracle.evaluate_gradient(&summary.increment).unwrap();
        assert!(residual.to_flat().iter().all(|r| r.abs() < 1e-10), "{x:?}");
        assert!((summary.cost.total - oracle.cost(&summary.increment).unwrap()).abs() < 1e-10);
        let jb = 0.5 * x.iter().map(|v| v * v).sum::<f64>();
        assert!((summary.cost.background - jb).abs() < 1e-12);
        assert_eq!(summary.ritz_values, None);
    }

    #[test]
    fn test_pending_increment_matches_emitted_increment() {
        let config = MinimizerConfig {
            n_inner: 3,
            ..MinimizerConfig::default()
        };
        let mut m = minimizer(3, config);
        let mut oracle = oracle();
        m.begin_outer_loop(OuterLoopSetup::new(1, 0.0)).unwrap();
        assert_eq!(m.pending_increment().unwrap().to_flat(), vec![0.0; 3]);

        let g0 = oracle.evaluate_gradient(&m.space().zeros()).unwrap();
        let outcome = m.step(0, g0).unwrap();
        assert_eq!(outcome.greduc, None);
        assert!(!outcome.finished);
        assert_eq!(
            m.pending_increment().unwrap().to_flat(),
            outcome.next_increment.to_flat()
        );
    }
}
