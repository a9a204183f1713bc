//! Preconditioned Lanczos/conjugate-gradient inner loop for incremental 4D-Var.
//!
//! Incremental 4D-Var minimizes, in each outer loop, a quadratic approximation
//! of the data-assimilation cost
//!
//! ```text
//! J(x) = J0 + g0^T x + 0.5 x^T H x
//! ```
//!
//! over a model-state increment `x`. The Hessian `H` is never formed: each inner
//! loop makes one call to a tangent-linear + adjoint gradient oracle
//! ([`GradientOracle`]) and the engine recovers `H q` from it. The Lanczos vectors
//! built along the way are persisted in a [`VectorStore`], reorthogonalized
//! against each other, and, at the end of an outer loop, recombined into Hessian
//! eigenvectors that precondition the following outer loops.
//!
//! ## Structure
//!
//! - [`state`]: optional-component [`StateVector`]s and the collective inner
//!   product of a [`VectorSpace`].
//! - [`algorithms`]: the numerical kernels (Lanczos recurrence, Hessian sampling,
//!   tridiagonal solve, Ritz pairs, eigenvector reconstruction).
//! - [`preconditioner`]: the product-form limited-memory spectral preconditioner.
//! - [`minimizer`]: the [`Minimizer`] orchestrator, one call per inner loop, and the
//!   checkpointable [`MinimizationState`].
//! - [`comm`], [`store`], [`diagnostics`], [`config`]: the collaborators the
//!   minimizer is generic over.
//!
//! ## Example Usage
//!
//! Minimizing `f(x) = 0.5 x^T A x - b^T x` for a small SPD matrix: the gradient
//! oracle is `A x - b`, and three inner loops span the whole space, so the
//! increment is the exact minimizer.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use faer::{Col, mat};
//! use lanczos_4dvar::{
//!     Geometry, GradientOracle, InMemoryStore, Minimizer, MinimizerConfig, NullSink,
//!     OuterLoopSetup, QuadraticOracle, SingleProcess, StateLayout, VectorSpace,
//! };
//!
//! let layout = StateLayout::single(3);
//! let a = mat![[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]];
//! let b = Col::from_fn(3, |i| (i + 1) as f64);
//! let mut oracle = QuadraticOracle::new(a, b, layout.clone()).unwrap();
//!
//! let space = VectorSpace::new(Arc::new(Geometry::unmasked(&layout)), SingleProcess::new());
//! let config = MinimizerConfig { n_inner: 3, ..MinimizerConfig::default() };
//! let mut minimizer = Minimizer::new(config, space, InMemoryStore::new(), NullSink).unwrap();
//!
//! let summary = minimizer.minimize(OuterLoopSetup::new(1, 0.0), &mut oracle).unwrap();
//! let gradient = oracle.evaluate_gradient(&summary.increment).unwrap();
//! assert!(gradient.to_flat().iter().all(|g| g.abs() < 1e-10));
//! ```

pub mod algorithms;
pub mod comm;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod minimizer;
pub mod oracle;
pub mod preconditioner;
pub mod state;
pub mod store;
pub mod utils;

pub use comm::{Communicator, SingleProcess, ThreadTeam};
pub use config::MinimizerConfig;
pub use diagnostics::{CsvDiagnostics, DiagnosticsSink, MemorySink, NullSink, StepDiagnostics};
pub use error::{BreakdownCause, MinimizerError, MinimizerErrorKind, MinimizerResult};
pub use minimizer::{
    CostFunctionValue, MinimizationState, Minimizer, OuterLoopRecord, OuterLoopSetup,
    OuterLoopSummary, StepOutcome,
};
pub use oracle::{GradientOracle, QuadraticOracle};
pub use preconditioner::{Preconditioner, PreconditionerMode};
pub use state::{Geometry, StateComponent, StateLayout, StateVector, VectorSpace};
pub use store::{FileStore, InMemoryStore, RecordId, VectorStore};
