//! Error types for the timeline core.
//!
//! Predicate failures propagate to the caller; persistence failures are
//! caught and logged at the outermost processor/observer boundary, leaving
//! the timeline at its last consistent state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimelineError {
    /// A predicate or operation needed samples on an unhydrated item.
    #[error("samples not loaded for timeline item {0}")]
    SamplesNotLoaded(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// The merge transaction found neither canonical link orientation.
    #[error("topology invariant violated: {0}")]
    TopologyInvariant(String),
}

impl TimelineError {
    /// Whether this error came from the storage engine rather than the
    /// domain. Persistence errors are quiesced at outer boundaries.
    pub fn is_persistence(&self) -> bool {
        matches!(self, TimelineError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, TimelineError>;
