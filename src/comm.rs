//! Collective communication between the processes that own the subdomain tiles.
//!
//! Every inner product of the minimization is a blocking all-reduce: all ranks
//! must call it together or the run deadlocks. The small tridiagonal
//! eigen-decomposition is computed by the leader alone and broadcast. The
//! [`Communicator`] trait is the seam for these operations, so a real message
//! passing layer can be plugged in while [`SingleProcess`] and [`ThreadTeam`]
//! cover serial runs and in-process tests.
//!
//! A fatal condition raises a run-wide abort flag. Every collective checks the
//! flag on entry, and ranks already blocked in a collective are released with
//! [`MinimizerErrorKind::Aborted`], so one failing rank cannot strand the rest.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{MinimizerErrorKind, MinimizerResult};

/// Collective operations required by the minimization engine.
pub trait Communicator {
    /// Rank of the calling process, `0..size()`.
    fn rank(&self) -> usize;

    /// Number of participating processes.
    fn size(&self) -> usize;

    /// The designated process that computes serial work before broadcasting it.
    fn is_leader(&self) -> bool {
        self.rank() == 0
    }

    /// Sums `local` over all ranks. Blocking and collective.
    fn all_reduce_sum(&self, local: f64) -> MinimizerResult<f64>;

    /// Overwrites `values` on every rank with the leader's copy. Blocking and collective.
    fn broadcast(&self, values: &mut [f64]) -> MinimizerResult<()>;

    /// Broadcasts an integer status from the leader.
    fn broadcast_status(&self, status: i32) -> MinimizerResult<i32> {
        let mut buf = [status as f64];
        self.broadcast(&mut buf)?;
        Ok(buf[0] as i32)
    }

    /// Marks the run as failed for every rank.
    fn raise_abort(&self);

    /// Whether any rank has raised the abort flag.
    fn abort_raised(&self) -> bool;
}

/// A communicator for a serial run: reductions and broadcasts are identities.
#[derive(Debug, Default)]
pub struct SingleProcess {
    aborted: AtomicBool,
}

impl SingleProcess {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, local: f64) -> MinimizerResult<f64> {
        if self.abort_raised() {
            return Err(MinimizerErrorKind::Aborted.into());
        }
        Ok(local)
    }

    fn broadcast(&self, _values: &mut [f64]) -> MinimizerResult<()> {
        if self.abort_raised() {
            return Err(MinimizerErrorKind::Aborted.into());
        }
        Ok(())
    }

    fn raise_abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn abort_raised(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

#[derive(Debug)]
struct TeamShared {
    size: usize,
    barrier: Mutex<BarrierState>,
    released: Condvar,
    partials: Mutex<Vec<f64>>,
    payload: Mutex<Vec<f64>>,
    aborted: AtomicBool,
}

impl TeamShared {
    /// Blocks until every member has arrived or the team aborts.
    ///
    /// The flag is only read while holding the barrier lock, and `abort` takes
    /// the same lock before notifying, so no waiter can miss the wake-up.
    fn wait(&self) -> MinimizerResult<()> {
        let mut state = self.barrier.lock();
        if self.aborted.load(Ordering::SeqCst) {
            return Err(MinimizerErrorKind::Aborted.into());
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            if self.aborted.load(Ordering::SeqCst) {
                return Err(MinimizerErrorKind::Aborted.into());
            }
            self.released.wait(&mut state);
        }
        Ok(())
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        let _state = self.barrier.lock();
        self.released.notify_all();
    }
}

/// One member of an in-process team of ranks, each running on its own thread.
///
/// Reductions are summed in rank order, so every member sees a bit-identical
/// result regardless of thread scheduling.
#[derive(Debug, Clone)]
pub struct ThreadTeam {
    rank: usize,
    size: usize,
    shared: Arc<TeamShared>,
}

impl ThreadTeam {
    /// Creates `size` connected members; hand one to each thread.
    pub fn new(size: usize) -> Vec<ThreadTeam> {
        let size = size.max(1);
        let shared = Arc::new(TeamShared {
            size,
            barrier: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
            partials: Mutex::new(vec![0.0; size]),
            payload: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
        });
        (0..size)
            .map(|rank| ThreadTeam {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for ThreadTeam {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce_sum(&self, local: f64) -> MinimizerResult<f64> {
        if self.abort_raised() {
            return Err(MinimizerErrorKind::Aborted.into());
        }
        self.shared.partials.lock()[self.rank] = local;
        self.shared.wait()?;
        let total = self.shared.partials.lock().iter().sum();
        // Nobody may overwrite its partial until every rank has read the total.
        self.shared.wait()?;
        Ok(total)
    }

    fn broadcast(&self, values: &mut [f64]) -> MinimizerResult<()> {
        if self.abort_raised() {
            return Err(MinimizerErrorKind::Aborted.into());
        }
        if self.is_leader() {
            let mut payload = self.shared.payload.lock();
            payload.clear();
            payload.extend_from_slice(values);
        }
        self.shared.wait()?;
        let result = {
            let payload = self.shared.payload.lock();
            if payload.len() == values.len() {
                if !self.is_leader() {
                    values.copy_from_slice(&payload);
                }
                Ok(())
            } else {
                Err(MinimizerErrorKind::CommunicationFailure(format!(
                    "rank {} expected {} broadcast values, leader sent {}",
                    self.rank,
                    values.len(),
                    payload.len()
                ))
                .into())
            }
        };
        self.shared.wait()?;
        result
    }

    fn raise_abort(&self) {
        self.shared.abort();
    }

    fn abort_raised(&self) -> bool {
        self.shared.aborted.load(Ordering::SeqCst)
    }
}
