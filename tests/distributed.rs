//! Integration tests for runs spread over several ranks.
//!
//! A diagonal Hessian makes the gradient oracle tile-local: each rank owns a
//! contiguous block of the state and evaluates `lambda_i x_i - b_i` on it. The
//! only coupling between ranks is then the collective inner product and the
//! broadcast of the tridiagonal eigen-decomposition, which is exactly what these
//! tests exercise against a serial run of the same problem.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, ensure};
use faer::{Col, Mat};
use lanczos_4dvar::utils::synthetic::{SyntheticProblem, linear_spectrum};
use lanczos_4dvar::{
    Communicator, Geometry, InMemoryStore, Minimizer, MinimizerConfig, MinimizerError,
    MinimizerErrorKind, MinimizerResult, NullSink, OuterLoopSetup, QuadraticOracle, RecordId,
    SingleProcess, StateLayout, StateVector, ThreadTeam, VectorSpace, VectorStore,
};
use rand::{SeedableRng, rngs::StdRng};

const N: usize = 16;
const RANKS: usize = 2;

/// What one rank reports at the end of its outer loops.
#[derive(Debug)]
struct RankOutcome {
    increment: Vec<f64>,
    ritz_values: Vec<f64>,
    gnorm: f64,
}

fn config() -> MinimizerConfig {
    MinimizerConfig {
        n_outer: 1,
        n_inner: 10,
        hessian_eigenvectors: true,
        ..MinimizerConfig::default()
    }
}

/// An in-memory store whose writes start failing after a fixed number of successes.
struct FailingStore {
    inner: InMemoryStore,
    writes_left: usize,
}

impl FailingStore {
    fn new(writes: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            writes_left: writes,
        }
    }
}

impl VectorStore for FailingStore {
    fn store(&mut self, id: RecordId, vector: &StateVector) -> MinimizerResult<()> {
        if self.writes_left == 0 {
            return Err(MinimizerErrorKind::PersistenceFailure {
                record: id.to_string(),
                message: "device full".to_string(),
            }
            .into());
        }
        self.writes_left -= 1;
        self.inner.store(id, vector)
    }

    fn load(&self, id: RecordId) -> MinimizerResult<StateVector> {
        self.inner.load(id)
    }

    fn contains(&self, id: RecordId) -> bool {
        self.inner.contains(id)
    }
}

/// Runs one outer loop on the rows `offset..offset + n` of a diagonal problem.
fn run_tile<C: Communicator>(
    comm: C,
    problem: &SyntheticProblem,
    offset: usize,
    n: usize,
) -> Result<RankOutcome> {
    Ok(run_tile_with_store(comm, problem, offset, n, InMemoryStore::new(), config())?)
}

fn run_tile_with_store<C: Communicator, S: VectorStore>(
    comm: C,
    problem: &SyntheticProblem,
    offset: usize,
    n: usize,
    store: S,
    config: MinimizerConfig,
) -> Result<RankOutcome, MinimizerError> {
    let layout = StateLayout::single(n);
    let a = Mat::from_fn(n, n, |i, j| if i == j { problem.a[(offset + i, offset + i)] } else { 0.0 });
    let b = Col::from_fn(n, |i| problem.b[offset + i]);
    let mut oracle = QuadraticOracle::new(a, b, layout.clone())?;

    let space = VectorSpace::new(Arc::new(Geometry::unmasked(&layout)), comm);
    let mut minimizer = Minimizer::new(config, space, store, NullSink)?;
    let summary = minimizer.minimize(OuterLoopSetup::new(1, 0.0), &mut oracle)?;
    Ok(RankOutcome {
        increment: summary.increment.to_flat(),
        ritz_values: summary.ritz_values.unwrap_or_default(),
        gnorm: minimizer.state().loops[0].gnorm,
    })
}

fn run_team(problem: &SyntheticProblem) -> Result<Vec<RankOutcome>> {
    let tile = N / RANKS;
    thread::scope(|scope| {
        let handles: Vec<_> = ThreadTeam::new(RANKS)
            .into_iter()
            .map(|member| {
                let offset = member.rank() * tile;
                scope.spawn(move || run_tile(member, problem, offset, tile))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("a rank panicked"))
                    .and_then(|outcome| outcome)
            })
            .collect()
    })
}

#[test]
fn test_thread_team_matches_single_process() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let problem = SyntheticProblem::diagonal(&linear_spectrum(N, 1.0, 16.0), &mut rng);

    let serial = run_tile(SingleProcess::new(), &problem, 0, N)?;
    let ranks = run_team(&problem)?;
    ensure!(ranks.len() == RANKS);

    let distributed: Vec<f64> = ranks.iter().flat_map(|r| r.increment.iter().copied()).collect();
    ensure!(distributed.len() == N);
    for (i, (d, s)) in distributed.iter().zip(&serial.increment).enumerate() {
        ensure!((d - s).abs() < 1e-10, "entry {i}: distributed {d} vs serial {s}");
    }

    ensure!((ranks[0].gnorm - serial.gnorm).abs() < 1e-12 * serial.gnorm);
    ensure!(ranks[0].ritz_values.len() == serial.ritz_values.len());
    for (d, s) in ranks[0].ritz_values.iter().zip(&serial.ritz_values) {
        ensure!((d - s).abs() < 1e-10 * s.abs(), "Ritz value {d} vs serial {s}");
    }
    Ok(())
}

#[test]
fn test_every_rank_sees_identical_scalars() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let problem = SyntheticProblem::diagonal(&linear_spectrum(N, 0.5, 40.0), &mut rng);
    let ranks = run_team(&problem)?;

    // Reductions are summed in rank order and Ritz pairs come from the leader.
    for rank in &ranks[1..] {
        ensure!(rank.gnorm == ranks[0].gnorm, "Gnorm differs across ranks");
        ensure!(rank.ritz_values == ranks[0].ritz_values, "Ritz values differ across ranks");
    }
    Ok(())
}

#[test]
fn test_abort_flag_is_shared_by_the_team() -> Result<()> {
    let team = ThreadTeam::new(3);
    ensure!(team.iter().all(|member| !member.abort_raised()));
    team[2].raise_abort();
    ensure!(team.iter().all(|member| member.abort_raised()));
    ensure!(team[0].is_leader() && !team[1].is_leader());
    Ok(())
}

#[test]
fn test_store_failure_on_one_rank_releases_the_team() -> Result<()> {
    const TILE: usize = 4;
    let mut rng = StdRng::seed_from_u64(11);
    let problem = Arc::new(SyntheticProblem::diagonal(
        &linear_spectrum(2 * TILE, 1.0, 8.0),
        &mut rng,
    ));
    let config = MinimizerConfig {
        n_outer: 1,
        n_inner: 6,
        ..MinimizerConfig::default()
    };

    let (tx, rx) = mpsc::channel();
    for member in ThreadTeam::new(2) {
        let tx = tx.clone();
        let problem = Arc::clone(&problem);
        let config = config.clone();
        thread::spawn(move || {
            let rank = member.rank();
            // Rank 1 loses its storage after three vector writes.
            let writes = if rank == 1 { 3 } else { usize::MAX };
            let outcome = run_tile_with_store(
                member,
                &problem,
                rank * TILE,
                TILE,
                FailingStore::new(writes),
                config,
            );
            let _ = tx.send((rank, outcome.map(|_| ())));
        });
    }
    drop(tx);

    let mut kinds = vec![None, None];
    for _ in 0..2 {
        let (rank, outcome) = rx
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| anyhow!("a rank is still blocked in a collective"))?;
        let err = outcome.err().ok_or_else(|| anyhow!("rank {rank} finished the outer loop"))?;
        kinds[rank] = Some(err.kind().clone());
    }

    ensure!(
        matches!(kinds[1], Some(MinimizerErrorKind::PersistenceFailure { .. })),
        "rank 1 reported {:?}",
        kinds[1]
    );
    ensure!(
        matches!(kinds[0], Some(MinimizerErrorKind::Aborted)),
        "rank 0 reported {:?}",
        kinds[0]
    );
    Ok(())
}
