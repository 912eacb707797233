//! Block scheduler for the parallel SGD workers.
//!
//! Coordinates workers so that the set of in-flight blocks is row-disjoint
//! and column-disjoint at every instant (the non-conflict invariant), while
//! preferring blocks that have been visited fewer times. All scheduler state
//! lives behind one mutex; the factor matrices themselves need no locking
//! because of the invariant.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard};

use ordered_float::OrderedFloat;

use crate::rng::FactorRng;

/// Priority-queue entry: (visit count + jitter, block index), min-first.
type Entry = Reverse<(OrderedFloat<f32>, u32)>;

/// Hands out block jobs under the non-conflict invariant and collects
/// per-block losses. Lives for one training invocation.
pub struct Scheduler {
    nr_bins: u32,
    nr_threads: u32,
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    nr_done_jobs: u64,
    /// Cumulative completion count that closes the current epoch.
    target: u64,
    nr_paused_threads: u32,
    terminated: bool,
    counts: Vec<u32>,
    busy_p: Vec<bool>,
    busy_q: Vec<bool>,
    block_losses: Vec<f64>,
    pq: BinaryHeap<Entry>,
    /// Jitter stream; breaks priority ties so equal-count blocks are not
    /// replayed in a fixed order.
    rng: FactorRng,
}

impl Scheduler {
    /// Create a scheduler over a `nr_bins x nr_bins` grid.
    ///
    /// Blocks listed in `cv_blocks` are held out: they never enter the queue
    /// and are never scheduled.
    pub fn new(nr_bins: u32, nr_threads: u32, cv_blocks: &[u32], mut rng: FactorRng) -> Self {
        let nr_blocks = (nr_bins * nr_bins) as usize;
        let mut held_out = vec![false; nr_blocks];
        for &b in cv_blocks {
            held_out[b as usize] = true;
        }

        let mut pq = BinaryHeap::with_capacity(nr_blocks);
        for block in 0..nr_blocks as u32 {
            if !held_out[block as usize] {
                pq.push(Reverse((OrderedFloat(rng.next_f32()), block)));
            }
        }

        Self {
            nr_bins,
            nr_threads,
            state: Mutex::new(State {
                nr_done_jobs: 0,
                target: (nr_bins * nr_bins) as u64,
                nr_paused_threads: 0,
                terminated: false,
                counts: vec![0; nr_blocks],
                busy_p: vec![false; nr_bins as usize],
                busy_q: vec![false; nr_bins as usize],
                block_losses: vec![0.0; nr_blocks],
                pq,
                rng,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("scheduler mutex poisoned")
    }

    /// Claim the least-visited block whose row and column stripes are free.
    ///
    /// Blocks popped while their stripe is busy are set aside and reinserted
    /// once a feasible block is found, so nothing is lost from the queue.
    /// Never blocks: with `nr_bins >= 2 * nr_threads` a feasible block always
    /// exists.
    pub fn get_job(&self) -> usize {
        let mut state = self.lock();
        let mut set_aside: Vec<Entry> = Vec::new();
        loop {
            let entry = state.pq.pop().expect("scheduler queue exhausted");
            let block = entry.0 .1;
            let p_block = (block / self.nr_bins) as usize;
            let q_block = (block % self.nr_bins) as usize;
            if state.busy_p[p_block] || state.busy_q[q_block] {
                set_aside.push(entry);
                continue;
            }
            for e in set_aside {
                state.pq.push(e);
            }
            state.busy_p[p_block] = true;
            state.busy_q[q_block] = true;
            state.counts[block as usize] += 1;
            return block as usize;
        }
    }

    /// Return a completed block with its loss, then park until the next
    /// epoch is authorized (or training is terminated).
    pub fn put_job(&self, block: usize, loss: f64) {
        let mut state = self.lock();
        let p_block = block / self.nr_bins as usize;
        let q_block = block % self.nr_bins as usize;
        state.busy_p[p_block] = false;
        state.busy_q[q_block] = false;
        state.block_losses[block] = loss;
        state.nr_done_jobs += 1;
        let priority = state.counts[block] as f32 + state.rng.next_f32();
        state.pq.push(Reverse((OrderedFloat(priority), block as u32)));
        state.nr_paused_threads += 1;
        self.cond.notify_all();

        // The terminated check keeps a worker from parking forever when the
        // orchestrator tears down mid-pause.
        while state.nr_done_jobs >= state.target && !state.terminated {
            state = self
                .cond
                .wait(state)
                .expect("scheduler mutex poisoned");
        }
        state.nr_paused_threads -= 1;
    }

    /// Sum of the most recent loss of every block.
    pub fn total_loss(&self) -> f64 {
        self.lock().block_losses.iter().sum()
    }

    /// Block until the epoch's job quota is met and every worker is parked.
    /// This is the orchestrator's quiescence point between epochs.
    pub fn wait_for_jobs_done(&self) {
        let mut state = self.lock();
        while state.nr_done_jobs < state.target {
            state = self
                .cond
                .wait(state)
                .expect("scheduler mutex poisoned");
        }
        while state.nr_paused_threads != self.nr_threads {
            state = self
                .cond
                .wait(state)
                .expect("scheduler mutex poisoned");
        }
    }

    /// Authorize the next epoch: raise the target by one grid's worth of
    /// jobs and wake every parked worker.
    pub fn resume(&self) {
        let mut state = self.lock();
        state.target += (self.nr_bins * self.nr_bins) as u64;
        self.cond.notify_all();
    }

    /// Ask workers to exit after their current block.
    pub fn terminate(&self) {
        let mut state = self.lock();
        state.terminated = true;
        self.cond.notify_all();
    }

    /// Whether [`Scheduler::terminate`] has been called.
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }
}
