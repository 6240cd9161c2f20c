//! Bounded episode storage with lock-free intake.
//!
//! Collector threads push finished episodes through a lock-free injector;
//! `consolidate` moves them into the read-mostly storage, assigning
//! insertion ids and bumping the local seen-counters. The processor reads
//! the storage through lock guards during its folds and removes episodes
//! through [`ReplayMemory::remove_episode`] outside any fold region.

use crate::core::Episode;
use crate::memory::sampler::MinibatchSampler;
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

/// Episode buffer shared between collectors and the replay processor.
pub struct ReplayMemory {
    /// Consolidated storage. Read-mostly during folds; the planner takes
    /// the write lock for its amortized recompute pass.
    episodes: RwLock<Vec<Episode>>,
    /// Lock-free intake from collector threads.
    injector: Injector<Episode>,
    /// Episodes waiting in the injector.
    pending: AtomicUsize,
    /// Episode count mirror of `episodes.len()`.
    n_seq: AtomicUsize,
    /// Stored transitions across all resident episodes.
    n_data: AtomicUsize,
    /// Next insertion id.
    next_id: AtomicI64,
    /// Episodes ever consolidated by this process.
    n_seen_episodes_local: AtomicI64,
    /// Transitions ever consolidated by this process.
    n_seen_transitions_local: AtomicI64,
    /// Set when intake or removal changed the array shape; consumed by the
    /// sampler re-prepare.
    structure_dirty: AtomicBool,
    /// Output channel written by the processor's eviction pass.
    avg_cumulative_reward: Mutex<f64>,
    sampler: MinibatchSampler,
}

impl ReplayMemory {
    /// Create an empty replay memory.
    pub fn new() -> Self {
        Self {
            episodes: RwLock::new(Vec::new()),
            injector: Injector::new(),
            pending: AtomicUsize::new(0),
            n_seq: AtomicUsize::new(0),
            n_data: AtomicUsize::new(0),
            next_id: AtomicI64::new(0),
            n_seen_episodes_local: AtomicI64::new(0),
            n_seen_transitions_local: AtomicI64::new(0),
            structure_dirty: AtomicBool::new(false),
            avg_cumulative_reward: Mutex::new(0.0),
            sampler: MinibatchSampler::new(),
        }
    }

    /// Queue a finished episode from a collector thread (lock-free).
    pub fn push(&self, episode: Episode) {
        self.injector.push(episode);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Move queued episodes into storage, assigning ids and updating the
    /// seen-counters. Returns the number of episodes consolidated.
    pub fn consolidate(&self) -> usize {
        let mut storage = self.episodes.write();
        let mut moved = 0usize;
        loop {
            match self.injector.steal() {
                Steal::Success(mut ep) => {
                    ep.id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    self.n_seen_episodes_local.fetch_add(1, Ordering::Relaxed);
                    self.n_seen_transitions_local
                        .fetch_add(ep.ndata() as i64, Ordering::Relaxed);
                    self.n_data.fetch_add(ep.ndata(), Ordering::Relaxed);
                    storage.push(ep);
                    moved += 1;
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        if moved > 0 {
            self.pending.fetch_sub(moved, Ordering::Relaxed);
            self.n_seq.store(storage.len(), Ordering::Relaxed);
            self.structure_dirty.store(true, Ordering::Relaxed);
        }
        moved
    }

    /// Number of resident episodes.
    pub fn read_n_seq(&self) -> usize {
        self.n_seq.load(Ordering::Relaxed)
    }

    /// Number of resident transitions.
    pub fn read_n_data(&self) -> usize {
        self.n_data.load(Ordering::Relaxed)
    }

    /// Episodes queued but not yet consolidated.
    pub fn pending_len(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Episodes ever consolidated by this process.
    pub fn n_seen_episodes_local(&self) -> i64 {
        self.n_seen_episodes_local.load(Ordering::Relaxed)
    }

    /// Transitions ever consolidated by this process.
    pub fn n_seen_transitions_local(&self) -> i64 {
        self.n_seen_transitions_local.load(Ordering::Relaxed)
    }

    /// Read access to the episode array for fold passes.
    pub fn episodes(&self) -> RwLockReadGuard<'_, Vec<Episode>> {
        self.episodes.read()
    }

    /// Write access for the planner's recompute pass and sampler draws.
    pub(crate) fn episodes_mut(&self) -> RwLockWriteGuard<'_, Vec<Episode>> {
        self.episodes.write()
    }

    /// Remove the episode at `index`.
    ///
    /// Swap-removes, so indices are invalidated while ids are preserved.
    /// Callers re-read indices within the same planning step, before any
    /// removal.
    pub fn remove_episode(&self, index: usize) {
        let mut storage = self.episodes.write();
        assert!(index < storage.len(), "episode index out of range");
        let removed = storage.swap_remove(index);
        self.n_data.fetch_sub(removed.ndata(), Ordering::Relaxed);
        self.n_seq.store(storage.len(), Ordering::Relaxed);
        self.structure_dirty.store(true, Ordering::Relaxed);
    }

    /// Episode indices flagged by the most recent sampler draw.
    pub fn last_sampled_episodes(&self) -> Vec<usize> {
        self.sampler.last_sampled_episodes()
    }

    /// Draw a minibatch of `(episode, step)` pairs, marking `just_sampled`.
    pub fn draw_minibatch<R: Rng>(&self, batch: usize, rng: &mut R) -> Vec<(usize, usize)> {
        let mut storage = self.episodes.write();
        self.sampler.draw(&mut storage, batch, rng)
    }

    /// Rebuild the sampler's distribution if the array shape changed.
    pub fn prepare_sampler(&self) {
        let needs_pass = self.structure_dirty.swap(false, Ordering::Relaxed);
        let storage = self.episodes.read();
        self.sampler.prepare(&storage, needs_pass);
    }

    /// Mean cumulative reward over resident episodes, written by the
    /// processor's eviction pass.
    pub fn avg_cumulative_reward(&self) -> f64 {
        *self.avg_cumulative_reward.lock()
    }

    pub(crate) fn set_avg_cumulative_reward(&self, value: f64) {
        *self.avg_cumulative_reward.lock() = value;
    }
}

impl Default for ReplayMemory {
    fn default() -> Self {
        Self::new()
    }
}
