//! # ecco-justify
//!
//! Justification finding for batches of entailments.
//!
//! - [`engine`]: regular justifications, optionally split across a rayon pool
//! - [`laconic`]: laconic refinement, routing heavy justifications to worker
//!   processes and light ones to the calling process
//! - [`isolated`] / [`worker`]: the two halves of the worker process protocol
//! - [`oracle`]: the reasoner boundary, with [`hierarchy::HierarchyOracle`]
//!   as a told-subsumption implementation
//!
//! Axioms are carried as functional-syntax terms ([`axiom`]) and cross the
//! process boundary as `Ontology(...)` documents ([`document`]).

use std::collections::{BTreeMap, BTreeSet};

pub mod axiom;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod isolated;
pub mod laconic;
pub mod oracle;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use axiom::{Axiom, AxiomParseError, Term};
pub use config::{ConfigError, EngineConfig};
pub use document::{parse_document, parse_documents, render_document, render_documents};
pub use engine::{BatchMode, BatchReport, JustificationEngine};
pub use error::{EngineError, Result};
pub use hierarchy::HierarchyOracle;
pub use isolated::{IsolatedRefiner, WorkerCommand, WORKER_SUBCOMMAND};
pub use laconic::{
    LaconicScheduler, RefinementOutcome, RefinementReport, RefinementStrategy, Route,
};
pub use oracle::{ExplanationGenerator, ExplanationOracle, OracleError};
pub use worker::{
    run_worker, serve, WorkerSettings, WATCHDOG_EXIT_CODE, WORKER_EMPTY_EXIT_CODE,
    WORKER_FAILED_EXIT_CODE,
};

/// Set of axioms, ordered by their canonical text.
pub type AxiomSet = BTreeSet<Axiom>;

/// A minimal set of axioms from the background knowledge base that entails
/// some axiom.
pub type Justification = AxiomSet;

/// A justification whose axioms have been weakened as far as possible.
pub type LaconicJustification = AxiomSet;

/// Entailment → its justifications. Every queried entailment has an entry.
pub type JustificationMap = BTreeMap<Axiom, BTreeSet<Justification>>;

pub type LaconicMap = BTreeMap<Axiom, BTreeSet<LaconicJustification>>;
