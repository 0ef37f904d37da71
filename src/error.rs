//! Error taxonomy for harvest runs
//!
//! Failures are isolated per target: one target's error is logged by the
//! run loop and never prevents the remaining targets from running.
//! Field-level extraction gaps are not errors at all; they resolve to
//! sentinel strings inside the extraction engine.

use thiserror::Error;

use crate::extract::EventRecord;

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Error types for a single target's harvest-and-persist cycle
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The expected container element never appeared; the target fails
    /// before any extraction work happens.
    #[error("expected element '{selector}' did not appear within {waited_secs}s")]
    ElementNotFound { selector: String, waited_secs: u64 },

    /// Browser session fault mid-harvest. Whatever was extracted before
    /// the fault is carried along so the caller can still persist it.
    #[error("browser session fault: {message}")]
    Session {
        message: String,
        partial: Vec<EventRecord>,
    },

    /// Content height kept changing past the safety cap. Carries the
    /// records accumulated so far, same as a session fault.
    #[error("content height still changing after {cycles} scroll cycles")]
    ConvergenceTimeout {
        cycles: u32,
        partial: Vec<EventRecord>,
    },

    /// Persistence-layer fault; the target's results are lost for this
    /// attempt.
    #[error("storage fault: {0}")]
    Storage(#[from] anyhow::Error),

    /// Missing or unreadable query source. Yields an empty run, never a
    /// crash.
    #[error("configuration: {0}")]
    Configuration(String),
}

impl HarvestError {
    /// Whether this error carries a salvageable partial batch.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        matches!(
            self,
            HarvestError::Session { .. } | HarvestError::ConvergenceTimeout { .. }
        )
    }

    /// Take the partial batch out of the error, leaving it empty.
    ///
    /// Returns an empty vec for variants that abort before extraction.
    pub fn take_partial(&mut self) -> Vec<EventRecord> {
        match self {
            HarvestError::Session { partial, .. }
            | HarvestError::ConvergenceTimeout { partial, .. } => std::mem::take(partial),
            _ => Vec::new(),
        }
    }

    /// Short phase label for log context.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        match self {
            HarvestError::ElementNotFound { .. } => "wait-for-container",
            HarvestError::Session { .. } => "session",
            HarvestError::ConvergenceTimeout { .. } => "convergence",
            HarvestError::Storage(_) => "storage",
            HarvestError::Configuration(_) => "configuration",
        }
    }
}
