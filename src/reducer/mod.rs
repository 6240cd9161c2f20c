//! Asynchronous distributed reduction.

pub mod async_reducer;

pub use async_reducer::{AsyncReducer, LocalAllReduce, ReduceElement, ReduceTransport};
