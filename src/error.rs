//! Error types for the replay processor.
//!
//! Two failure classes exist:
//! - fatal configuration (a clip schedule that can never open, an empty
//!   batch size) — the training run cannot proceed;
//! - reducer transport failure — the collective aborted and no retry is
//!   attempted.
//!
//! Numerical guards (negative variance from cancellation) are not errors;
//! they clamp silently and log at debug level.

use std::fmt;

/// Error raised by the reduction transport.
///
/// The transport never retries; an aborted collective is fatal to the
/// training step that observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The collective operation aborted with a transport-level message.
    Aborted(String),
    /// The reducer's background worker is gone.
    WorkerGone,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Aborted(msg) => write!(f, "collective aborted: {}", msg),
            TransportError::WorkerGone => write!(f, "reducer worker terminated"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Error raised by the replay processor.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorError {
    /// The clip schedule produced `c_max <= 1` while the clip bound is
    /// positive: the importance-weight window can never open.
    InvalidAnnealing {
        /// Computed clip ceiling.
        c_max: f64,
        /// Configured clip bound.
        clip: f64,
    },
    /// A configuration field is out of its documented range.
    InvalidConfig(String),
    /// The reduction transport failed.
    Transport(TransportError),
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::InvalidAnnealing { c_max, clip } => write!(
                f,
                "unallowed annealing values: c_max = {} with clip bound {}",
                c_max, clip
            ),
            ProcessorError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            ProcessorError::Transport(e) => write!(f, "transport failure: {}", e),
        }
    }
}

impl std::error::Error for ProcessorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessorError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ProcessorError {
    fn from(e: TransportError) -> Self {
        ProcessorError::Transport(e)
    }
}
