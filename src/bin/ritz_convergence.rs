//! Experiment Runner for Ritz-value convergence and preconditioning.
//!
//! This executable minimizes a synthetic quadratic cost whose Hessian has a
//! prescribed spectrum, over one or more outer loops. For every inner loop it
//! records how close the extreme Ritz values of `T(k)` are to the true extreme
//! eigenvalues, together with the gradient reduction and the cost. With
//! preconditioning enabled, the later outer loops show the effect of the
//! limited-memory preconditioner built from the earlier ones.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use lanczos_4dvar::utils::synthetic::{SyntheticProblem, geometric_spectrum, linear_spectrum};
use lanczos_4dvar::{
    CsvDiagnostics, DiagnosticsSink, Geometry, GradientOracle, InMemoryStore, MinimizationState,
    Minimizer, MinimizerConfig, MinimizerErrorKind, MinimizerResult, OuterLoopSetup,
    PreconditionerMode, SingleProcess, StateLayout, StateVector, StepDiagnostics, VectorSpace,
};
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;

/// How the eigenvalues of the test Hessian are distributed.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum Spectrum {
    /// Evenly spaced on `[min, max]`.
    Linear,
    /// Geometrically spaced on `[min, max]`, clustering at the small end.
    Geometric,
}

/// Command-line arguments for the Ritz convergence experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "ritz-convergence",
    about = "Tracks Ritz-value convergence of the preconditioned Lanczos/CG inner loop."
)]
struct RitzArgs {
    /// Dimension of the test problem.
    #[clap(long, default_value_t = 200)]
    n: usize,

    /// Eigenvalue distribution of the Hessian.
    #[clap(long, value_enum, default_value_t = Spectrum::Geometric)]
    spectrum: Spectrum,

    /// Smallest Hessian eigenvalue.
    #[clap(long, default_value_t = 1.0)]
    lambda_min: f64,

    /// Largest Hessian eigenvalue.
    #[clap(long, default_value_t = 1000.0)]
    lambda_max: f64,

    /// Seed for the random rotation and right-hand side.
    #[clap(long, default_value_t = 42)]
    seed: u64,

    /// TOML run configuration. When absent the flags below are used.
    #[clap(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of outer loops.
    #[clap(long, default_value_t = 2)]
    n_outer: usize,

    /// Number of inner loops per outer loop.
    #[clap(long, default_value_t = 30)]
    n_inner: usize,

    /// Precondition outer loops after the first.
    #[clap(long)]
    precondition: bool,

    /// Preconditioner mode: -2, -1, 1 or 2.
    #[clap(long, default_value_t = 2, allow_negative_numbers = true)]
    mode: i32,

    /// Directory for the per-step diagnostics, the checkpoint, and the convergence CSV.
    #[clap(long, value_name = "DIR")]
    output: PathBuf,
}

/// Represents a single row of data for the Ritz convergence CSV.
#[derive(Debug, Serialize)]
struct ConvergenceRow {
    outer: usize,
    inner: usize,
    /// Relative distance of the smallest Ritz value to the smallest eigenvalue.
    relative_error_min: Option<f64>,
    /// Relative distance of the largest Ritz value to the largest eigenvalue.
    relative_error_max: Option<f64>,
    converged_pairs: Option<usize>,
    greduc: Option<f64>,
    cost: f64,
}

/// Forwards every step to the CSV diagnostics and derives the convergence row.
struct ConvergenceSink {
    diagnostics: CsvDiagnostics,
    writer: csv::Writer<File>,
    lambda_min: f64,
    lambda_max: f64,
}

impl DiagnosticsSink for ConvergenceSink {
    fn record(&mut self, row: &StepDiagnostics) -> MinimizerResult<()> {
        self.diagnostics.record(row)?;
        let convergence = ConvergenceRow {
            outer: row.outer,
            inner: row.inner,
            relative_error_min: row
                .ritz_min
                .map(|r| (r - self.lambda_min).abs() / self.lambda_min),
            relative_error_max: row
                .ritz_max
                .map(|r| (r - self.lambda_max).abs() / self.lambda_max),
            converged_pairs: row.converged_pairs,
            greduc: row.greduc,
            cost: row.cost_total,
        };
        // Persistence errors are reported through the library's error type.
        let write = self
            .writer
            .serialize(&convergence)
            .map_err(|e| e.to_string())
            .and_then(|()| self.writer.flush().map_err(|e| e.to_string()));
        write.map_err(|message| {
            MinimizerErrorKind::PersistenceFailure {
                record: "ritz_convergence.csv".to_string(),
                message,
            }
            .into()
        })
    }

    fn checkpoint(&mut self, state: &MinimizationState) -> MinimizerResult<()> {
        self.diagnostics.checkpoint(state)
    }
}

/// The main entry point for the Ritz convergence experiment.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = RitzArgs::parse();

    let config = match &args.config {
        Some(path) => MinimizerConfig::from_file(path)?,
        None => MinimizerConfig {
            n_outer: args.n_outer,
            n_inner: args.n_inner,
            precondition: args.precondition,
            mode: PreconditionerMode::try_from(args.mode)?,
            hessian_eigenvectors: true,
            ..MinimizerConfig::default()
        },
    };
    config.validate()?;
    log::info!(
        "Starting Ritz convergence analysis: n = {}, {:?} spectrum on [{}, {}], {} x {} loops",
        args.n,
        args.spectrum,
        args.lambda_min,
        args.lambda_max,
        config.n_outer,
        config.n_inner
    );

    // 1. Setup the test problem.
    let eigenvalues = match args.spectrum {
        Spectrum::Linear => linear_spectrum(args.n, args.lambda_min, args.lambda_max),
        Spectrum::Geometric => geometric_spectrum(args.n, args.lambda_min, args.lambda_max),
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let problem = SyntheticProblem::with_spectrum(&eigenvalues, &mut rng)?;
    let mut oracle = problem.oracle()?;
    let layout = StateLayout::single(args.n);

    // 2. Wire the minimizer.
    let diagnostics = CsvDiagnostics::create(&args.output)?;
    let writer = csv::Writer::from_path(args.output.join("ritz_convergence.csv"))?;
    let sink = ConvergenceSink {
        diagnostics,
        writer,
        lambda_min: problem.eigenvalues[0],
        lambda_max: problem.eigenvalues[args.n - 1],
    };
    let space = VectorSpace::new(Arc::new(Geometry::unmasked(&layout)), SingleProcess::new());
    let n_outer = config.n_outer;
    let mut minimizer = Minimizer::new(config, space, InMemoryStore::new(), sink)?;

    // 3. Run the outer loops, re-linearizing around the accumulated increment.
    let mut background = StateVector::zeros(&layout);
    for outer in 1..=n_outer {
        let cost0 = oracle.cost(&background)?;
        let setup = OuterLoopSetup::new(outer, cost0).with_background_offset(background.clone());
        let offset = background.clone();
        let mut shifted = |increment: &StateVector| -> MinimizerResult<StateVector> {
            oracle.evaluate_gradient(&StateVector::add(&offset, increment, 1.0, 1.0)?)
        };
        let summary = minimizer.minimize(setup, &mut shifted)?;
        background.axpy(1.0, &summary.increment)?;

        log::info!(
            "Outer loop {outer}: J = {:.10e}, greduc = {:.3e}, {} converged eigenpairs",
            summary.cost.total,
            summary.greduc.unwrap_or(f64::NAN),
            summary.converged_pairs
        );
    }

    // 4. Report the distance to the exact minimizer.
    let exact = problem.minimizer()?;
    let x = background.to_flat();
    let error: f64 = (0..args.n).map(|i| (x[i] - exact[i]).powi(2)).sum::<f64>().sqrt();
    let norm: f64 = (0..args.n).map(|i| exact[i].powi(2)).sum::<f64>().sqrt();
    log::info!("Relative error against the exact minimizer: {:.3e}", error / norm);
    log::info!("Ritz convergence analysis complete. Results in {:?}.", &args.output);
    Ok(())
}
