//! The explanation oracle boundary.
//!
//! Reasoning is somebody else's job. The engine only needs two kinds of
//! generator: one over a background knowledge base (regular justifications)
//! and one over a single justification (laconic justifications). Generators
//! are short-lived and never shared between tasks, so implementations may keep
//! mutable session state inside them.

use std::collections::BTreeSet;

use crate::axiom::Axiom;
use crate::AxiomSet;

/// Answers explanation queries for one entailment at a time.
///
/// An empty result means "no explanation found" and is not an error.
pub trait ExplanationGenerator {
    fn explanations(
        &mut self,
        entailment: &Axiom,
        limit: usize,
    ) -> Result<BTreeSet<AxiomSet>, OracleError>;
}

pub trait ExplanationOracle: Send + Sync {
    /// Generator for minimal axiom sets drawn from `background`.
    fn regular_generator<'a>(&'a self, background: &'a AxiomSet)
        -> Box<dyn ExplanationGenerator + 'a>;

    /// Generator for laconic (weakened) axiom sets drawn from `justification`.
    fn laconic_generator<'a>(
        &'a self,
        justification: &'a AxiomSet,
    ) -> Box<dyn ExplanationGenerator + 'a>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("reasoner failure: {0}")]
    Reasoner(String),
}

impl OracleError {
    /// Failures a worker skips over instead of giving up on the whole unit.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            OracleError::InvalidArgument(_) | OracleError::ResourceExhausted(_)
        )
    }
}
