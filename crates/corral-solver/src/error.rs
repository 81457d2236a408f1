use corral_util::errors::CorralError;
use thiserror::Error;

use crate::explain::ConflictCore;

/// Typed failure of a solve. Every failure is one of these, never an empty
/// solution.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("unsatisfiable request:\n{0}")]
    Unsatisfiable(ConflictCore),

    #[error("solver timed out after {elapsed_ms} ms (budget {budget_ms} ms)")]
    Timeout { budget_ms: i64, elapsed_ms: u64 },

    #[error("packages not found in any channel: {}", .0.join(", "))]
    PackagesNotFound(Vec<String>),

    #[error("repository index is corrupt: {0}")]
    IndexCorrupt(String),
}

impl From<SolveError> for CorralError {
    fn from(err: SolveError) -> Self {
        match err {
            SolveError::Unsatisfiable(core) => CorralError::Unsatisfiable {
                explanation: core.explanation(),
            },
            SolveError::Timeout {
                budget_ms,
                elapsed_ms,
            } => CorralError::Timeout {
                budget_ms,
                elapsed_ms,
            },
            SolveError::PackagesNotFound(specs) => CorralError::PackagesNotFound { specs },
            SolveError::IndexCorrupt(message) => CorralError::IndexCorrupt { message },
        }
    }
}
