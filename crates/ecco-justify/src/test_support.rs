//! Deterministic oracle stub shared by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::axiom::Axiom;
use crate::oracle::{ExplanationGenerator, ExplanationOracle, OracleError};
use crate::AxiomSet;

pub(crate) fn ax(s: &str) -> Axiom {
    Axiom::parse(s).unwrap()
}

pub(crate) fn set(items: &[&str]) -> AxiomSet {
    items.iter().map(|s| ax(s)).collect()
}

#[derive(Default)]
pub(crate) struct StubOracle {
    pub regular: BTreeMap<Axiom, BTreeSet<AxiomSet>>,
    pub laconic: BTreeMap<AxiomSet, BTreeSet<AxiomSet>>,
    pub failing: BTreeSet<Axiom>,
    pub failing_justifications: BTreeSet<AxiomSet>,
    pub panicking_justifications: BTreeSet<AxiomSet>,
    pub generators: AtomicUsize,
}

impl StubOracle {
    pub fn generators(&self) -> usize {
        self.generators.load(Ordering::SeqCst)
    }
}

struct RegularStub<'a> {
    oracle: &'a StubOracle,
}

struct LaconicStub<'a> {
    oracle: &'a StubOracle,
    justification: &'a AxiomSet,
}

impl ExplanationGenerator for RegularStub<'_> {
    fn explanations(
        &mut self,
        entailment: &Axiom,
        limit: usize,
    ) -> Result<BTreeSet<AxiomSet>, OracleError> {
        if self.oracle.failing.contains(entailment) {
            return Err(OracleError::Reasoner(format!("stub failure for {entailment}")));
        }
        Ok(self
            .oracle
            .regular
            .get(entailment)
            .map(|justs| justs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

impl ExplanationGenerator for LaconicStub<'_> {
    fn explanations(
        &mut self,
        _entailment: &Axiom,
        limit: usize,
    ) -> Result<BTreeSet<AxiomSet>, OracleError> {
        if self.oracle.panicking_justifications.contains(self.justification) {
            panic!("stub reasoner blew up");
        }
        if self.oracle.failing_justifications.contains(self.justification) {
            return Err(OracleError::InvalidArgument("stub laconic failure".into()));
        }
        Ok(self
            .oracle
            .laconic
            .get(self.justification)
            .map(|sets| sets.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

impl ExplanationOracle for StubOracle {
    fn regular_generator<'a>(
        &'a self,
        _background: &'a AxiomSet,
    ) -> Box<dyn ExplanationGenerator + 'a> {
        self.generators.fetch_add(1, Ordering::SeqCst);
        Box::new(RegularStub { oracle: self })
    }

    fn laconic_generator<'a>(
        &'a self,
        justification: &'a AxiomSet,
    ) -> Box<dyn ExplanationGenerator + 'a> {
        self.generators.fetch_add(1, Ordering::SeqCst);
        Box::new(LaconicStub {
            oracle: self,
            justification,
        })
    }
}
