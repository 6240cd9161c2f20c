//! Non-blocking vector AllReduce handle.
//!
//! The learner must not stall on a collective every training step, so the
//! reducer splits the operation in two phases: [`AsyncReducer::submit`]
//! hands the local contribution to a background worker, and
//! [`AsyncReducer::get`] returns the result of the *previous* submit. The
//! one-step lag is acceptable because the reduced quantities are
//! slow-moving population statistics.
//!
//! # Architecture
//!
//! ```text
//! caller thread                    worker thread
//! ┌──────────────┐   channel      ┌──────────────────┐
//! │ submit(vec)  │ ─────────────→ │ transport        │
//! │ get(false)   │ ← latest slot  │   .all_reduce()  │
//! │ get(true)    │ ← wait + slot  │ install result   │
//! └──────────────┘                └──────────────────┘
//! ```
//!
//! A transport failure is recorded in the slot and surfaces as an error on
//! every later `get`; the reducer never retries.

use crate::error::TransportError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Element type a reducer can sum: long integers or extended-precision
/// floats.
pub trait ReduceElement: Copy + Send + Sync + 'static {
    /// Additive identity.
    const ZERO: Self;

    /// Elementwise sum.
    fn add(self, other: Self) -> Self;
}

impl ReduceElement for i64 {
    const ZERO: Self = 0;

    #[inline]
    fn add(self, other: Self) -> Self {
        self + other
    }
}

impl ReduceElement for f64 {
    const ZERO: Self = 0.0;

    #[inline]
    fn add(self, other: Self) -> Self {
        self + other
    }
}

/// Transport performing the blocking collective sum across participants.
///
/// The in-process implementation is [`LocalAllReduce`]; a multi-process
/// deployment plugs an MPI-style transport in behind the same trait.
pub trait ReduceTransport<T: ReduceElement>: Send + Sync + 'static {
    /// Sum `local` with every other participant's contribution.
    fn all_reduce(&self, local: &[T]) -> Result<Vec<T>, TransportError>;
}

/// In-process transport over homogeneous ranks.
///
/// With one rank (the default) the global sum is the local contribution;
/// with more it models N identical participants, which is how single-node
/// runs and tests stand in for a real collective.
#[derive(Debug, Clone)]
pub struct LocalAllReduce {
    n_ranks: usize,
}

impl LocalAllReduce {
    /// Single-rank transport.
    pub fn new() -> Self {
        Self { n_ranks: 1 }
    }

    /// Transport emulating `n_ranks` identical participants.
    pub fn with_ranks(n_ranks: usize) -> Self {
        assert!(n_ranks > 0, "a collective needs at least one rank");
        Self { n_ranks }
    }
}

impl Default for LocalAllReduce {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ReduceElement> ReduceTransport<T> for LocalAllReduce {
    fn all_reduce(&self, local: &[T]) -> Result<Vec<T>, TransportError> {
        Ok(local
            .iter()
            .map(|&x| (0..self.n_ranks).fold(T::ZERO, |acc, _| acc.add(x)))
            .collect())
    }
}

struct SlotState<T> {
    latest: Vec<T>,
    in_flight: usize,
    failed: Option<TransportError>,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    settled: Condvar,
}

/// Two-phase asynchronous reducer.
///
/// `submit` never blocks; `get(true)` waits for every pending reduction to
/// settle, `get(false)` returns the last settled result immediately. The
/// constructor seeds an initial guess so early reads are defined.
pub struct AsyncReducer<T: ReduceElement> {
    tx: Option<Sender<Vec<T>>>,
    slot: Arc<Slot<T>>,
    len: usize,
    worker: Option<JoinHandle<()>>,
}

impl<T: ReduceElement> AsyncReducer<T> {
    /// Create a reducer over `transport`, seeded with `initial`.
    ///
    /// The initial guess is both installed as the first settled result and
    /// submitted, so a blocking `get` right after construction returns the
    /// globally reduced guess.
    pub fn new<Tr: ReduceTransport<T>>(transport: Tr, initial: Vec<T>) -> Self {
        let len = initial.len();
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState {
                latest: initial.clone(),
                in_flight: 0,
                failed: None,
            }),
            settled: Condvar::new(),
        });
        let (tx, rx): (Sender<Vec<T>>, Receiver<Vec<T>>) = unbounded();

        let worker_slot = Arc::clone(&slot);
        let worker = thread::Builder::new()
            .name("async-reducer".to_string())
            .spawn(move || {
                for local in rx.iter() {
                    let result = transport.all_reduce(&local);
                    let mut st = worker_slot.state.lock();
                    st.in_flight -= 1;
                    match result {
                        Ok(global) => st.latest = global,
                        Err(e) => st.failed = Some(e),
                    }
                    worker_slot.settled.notify_all();
                }
            })
            .expect("failed to spawn reducer worker");

        let reducer = Self {
            tx: Some(tx),
            slot,
            len,
            worker: Some(worker),
        };
        reducer.submit(initial);
        reducer
    }

    /// Length of the reduced vectors.
    pub fn payload_len(&self) -> usize {
        self.len
    }

    /// Contribute the local partial sum to the next reduction.
    ///
    /// # Panics
    /// Panics if `local` does not match the reducer's vector length.
    pub fn submit(&self, local: Vec<T>) {
        assert_eq!(local.len(), self.len, "reducer payload length mismatch");
        {
            let mut st = self.slot.state.lock();
            st.in_flight += 1;
        }
        // Send after bumping in_flight so a blocking get cannot observe a
        // quiescent slot between the two.
        if self
            .tx
            .as_ref()
            .expect("reducer channel closed")
            .send(local)
            .is_err()
        {
            let mut st = self.slot.state.lock();
            st.in_flight -= 1;
            st.failed = Some(TransportError::WorkerGone);
            self.slot.settled.notify_all();
        }
    }

    /// Retrieve the result of the previous `submit`.
    ///
    /// With `force_blocking` the call waits until every pending reduction
    /// has settled; otherwise it returns the most recent settled result
    /// right away. A transport failure is returned as an error on this and
    /// every later call.
    pub fn get(&self, force_blocking: bool) -> Result<Vec<T>, TransportError> {
        let mut st = self.slot.state.lock();
        if force_blocking {
            while st.in_flight > 0 && st.failed.is_none() {
                self.slot.settled.wait(&mut st);
            }
        }
        match &st.failed {
            Some(e) => Err(e.clone()),
            None => Ok(st.latest.clone()),
        }
    }
}

impl<T: ReduceElement> Drop for AsyncReducer<T> {
    fn drop(&mut self) {
        // Closing the channel ends the worker's receive loop.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
