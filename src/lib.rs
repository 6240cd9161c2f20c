//! # refer_replay: experience replay processing for off-policy RL
//!
//! Hot-path bookkeeping for a distributed off-policy trainer: a bounded
//! buffer of episodes fed by collector threads, online moment estimation
//! for reward and state normalization, the ReF-ER importance-sampling
//! penalty controller, and an episode-eviction planner with four
//! interchangeable strategies.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Collector 1   Collector 2   Collector N                      │
//! │     │             │             │      (lock-free intake)    │
//! │     └─────────────┼─────────────┘                            │
//! │                   ▼                                          │
//! │           ┌──────────────┐        ┌──────────────────┐       │
//! │           │ ReplayMemory │◄──────►│ MinibatchSampler │       │
//! │           └──────┬───────┘        └──────────────────┘       │
//! │                  │ parallel folds (rayon)                    │
//! │                  ▼                                           │
//! │         ┌─────────────────┐      ┌────────────────────┐      │
//! │         │ ReplayProcessor │◄────►│ AsyncReducer (x3)  │      │
//! │         │ moments, ReF-ER │      │ submit / lagged get│      │
//! │         │ eviction planner│      └────────────────────┘      │
//! │         └─────────────────┘                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Step ordering
//!
//! Within one training step the processor runs, in this order: moment
//! update, ReF-ER penalty update, eviction selection, guarded removal,
//! sampler re-prepare. Global statistics cross process boundaries through
//! the async reducers with a one-step lag: `get` returns the result of the
//! *previous* `submit`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use refer_replay::{Episode, ReplayConfig, ReplayMemory, ReplayProcessor};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(ReplayMemory::new());
//! memory.push(Episode::new(states, rewards, imp_weights, kl_divs));
//!
//! let cfg = ReplayConfig::new(obs_dim)
//!     .with_clip_imp_weight(4.0)
//!     .with_penal_tol(0.1)
//!     .with_max_tot_obs(1 << 18);
//! let mut processor = ReplayProcessor::new(Arc::clone(&memory), cfg)?;
//!
//! processor.process_step(1.0, 1.0, grad_step, grad_step == 0)?;
//! println!("{}", processor.report_metrics());
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod memory;
pub mod processing;
pub mod reducer;
pub mod scheduling;

pub use config::{EvictionAlgorithm, ReplayConfig};
pub use core::{Episode, MomentStats, StateRewardStats};
pub use error::{ProcessorError, TransportError};
pub use memory::{MinibatchSampler, ReplayMemory};
pub use processing::{
    ClipRange, EvictionPlanner, PlanSummary, ReFerController, ReplayProcessor,
};
pub use reducer::{AsyncReducer, LocalAllReduce, ReduceElement, ReduceTransport};
pub use scheduling::anneal_rate;
