//! Regular justifications for batches of entailments.
//!
//! Parallel batches are split recursively: a unit larger than the leaf
//! threshold is halved, one half is forked onto the rayon pool and the other is
//! computed on the current thread. Each split returns its own [`BatchReport`]
//! and the parent merges them, so no map is shared between tasks.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::axiom::Axiom;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::oracle::ExplanationOracle;
use crate::{AxiomSet, Justification, JustificationMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Sequential,
    Parallel,
}

/// Result of one batch call, with the diagnostics gathered on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub justifications: JustificationMap,
    /// Entailments for which the oracle found nothing.
    pub lookup_misses: BTreeSet<Axiom>,
    /// Number of times a work unit was split in two.
    pub forks: usize,
    /// Number of work units computed directly.
    pub leaves: usize,
}

impl BatchReport {
    fn merge(&mut self, other: BatchReport) {
        self.justifications.extend(other.justifications);
        self.lookup_misses.extend(other.lookup_misses);
        self.forks += other.forks;
        self.leaves += other.leaves;
    }
}

/// Where a unit of `len` entailments is cut, or `None` if it is a leaf.
pub fn split_point(len: usize, leaf_threshold: usize) -> Option<usize> {
    (len > leaf_threshold.max(1)).then_some(len / 2)
}

pub struct JustificationEngine {
    oracle: Arc<dyn ExplanationOracle>,
    background: Arc<AxiomSet>,
    config: EngineConfig,
}

impl JustificationEngine {
    pub fn new(
        oracle: Arc<dyn ExplanationOracle>,
        background: impl Into<Arc<AxiomSet>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            oracle,
            background: background.into(),
            config,
        }
    }

    pub fn oracle(&self) -> Arc<dyn ExplanationOracle> {
        Arc::clone(&self.oracle)
    }

    pub fn background(&self) -> &AxiomSet {
        &self.background
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Justifications for every entailment, at most `limit` each.
    ///
    /// Every entailment gets an entry, possibly an empty set. An oracle error
    /// aborts the call.
    pub fn find_justifications(
        &self,
        entailments: &BTreeSet<Axiom>,
        limit: usize,
        mode: BatchMode,
    ) -> Result<JustificationMap> {
        self.find_justifications_with_report(entailments, limit, mode)
            .map(|report| report.justifications)
    }

    pub fn find_justifications_with_report(
        &self,
        entailments: &BTreeSet<Axiom>,
        limit: usize,
        mode: BatchMode,
    ) -> Result<BatchReport> {
        if limit == 0 {
            return Err(EngineError::InvalidLimit(limit));
        }
        let units: Vec<Axiom> = entailments.iter().cloned().collect();
        let started = Instant::now();

        let report = match mode {
            BatchMode::Sequential => self.compute_directly(&units, limit)?,
            BatchMode::Parallel => {
                let mut builder = rayon::ThreadPoolBuilder::new();
                if let Some(threads) = self.config.batch_threads {
                    builder = builder.num_threads(threads);
                }
                let pool = builder.build()?;
                pool.install(|| self.compute_split(&units, limit))?
            }
        };

        tracing::info!(
            entailments = units.len(),
            lookup_misses = report.lookup_misses.len(),
            forks = report.forks,
            mode = ?mode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "computed justifications"
        );
        Ok(report)
    }

    /// Justifications for one entailment using the configured default limit.
    pub fn justifications_for(&self, entailment: &Axiom) -> Result<BTreeSet<Justification>> {
        let justs = self.justify_one(entailment, self.config.justification_limit)?;
        if justs.is_empty() {
            tracing::warn!(entailment = %entailment, "could not retrieve justifications");
        }
        Ok(justs)
    }

    fn justify_one(&self, entailment: &Axiom, limit: usize) -> Result<BTreeSet<Justification>> {
        let mut generator = self.oracle.regular_generator(&self.background);
        generator
            .explanations(entailment, limit)
            .map_err(|source| EngineError::Oracle {
                entailment: entailment.clone(),
                source,
            })
    }

    fn compute_directly(&self, unit: &[Axiom], limit: usize) -> Result<BatchReport> {
        let mut report = BatchReport {
            leaves: 1,
            ..BatchReport::default()
        };
        for entailment in unit {
            let justs = self.justify_one(entailment, limit)?;
            if justs.is_empty() {
                tracing::warn!(entailment = %entailment, "could not retrieve justifications");
                report.lookup_misses.insert(entailment.clone());
            }
            report.justifications.insert(entailment.clone(), justs);
        }
        Ok(report)
    }

    fn compute_split(&self, unit: &[Axiom], limit: usize) -> Result<BatchReport> {
        let Some(mid) = split_point(unit.len(), self.config.leaf_threshold) else {
            return self.compute_directly(unit, limit);
        };
        let (first, second) = unit.split_at(mid);
        tracing::debug!(
            size = unit.len(),
            forked = first.len(),
            local = second.len(),
            "splitting work unit"
        );

        // join runs the first closure here and leaves the second for stealing
        let (local, forked) = rayon::join(
            || self.compute_split(second, limit),
            || self.compute_split(first, limit),
        );
        let mut report = local?;
        report.merge(forked?);
        report.forks += 1;
        Ok(report)
    }
}
