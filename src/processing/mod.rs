//! Replay processing: folds, penalty control, eviction planning.
//!
//! - [`ReplayProcessor`]: per-step orchestration facade
//! - [`ReFerController`]: beta/alpha fixed-point controller
//! - [`EvictionPlanner`]: episode selection, removal, sampler re-prepare
//! - [`fold`]: parallel reductions over the episode array
//! - [`histogram`]: importance-weight diagnostic

pub mod fold;
pub mod histogram;
pub mod planner;
pub mod processor;
pub mod refer;
pub mod selectors;


pub use planner::{ClipRange, EvictionPlanner, PlanSummary};
pub use processor::ReplayProcessor;
pub use refer::ReFerController;
pub use selectors::{Direction, ExtremumSelector};
