//! Schedules that evolve over the gradient-step counter.

pub mod anneal;

pub use anneal::anneal_rate;
