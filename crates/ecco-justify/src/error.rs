use crate::axiom::Axiom;
use crate::oracle::OracleError;

/// Failures of the batch (regular justification) path.
///
/// Laconic refinement never returns these: its failures are recorded as
/// [`crate::laconic::RefinementOutcome::Absent`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("justification limit must be at least 1, got {0}")]
    InvalidLimit(usize),
    #[error("oracle failed on {entailment}: {source}")]
    Oracle {
        entailment: Axiom,
        #[source]
        source: OracleError,
    },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
