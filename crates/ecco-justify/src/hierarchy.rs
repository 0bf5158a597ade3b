//! Told-subsumption reference oracle.
//!
//! Not a description-logic reasoner: it follows asserted `SubClassOf` and
//! `EquivalentClasses` edges between named classes and nothing else. That is
//! enough to drive the batch engine, the scheduler and the worker process end
//! to end without an external reasoner.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::axiom::{Axiom, Term};
use crate::oracle::{ExplanationGenerator, ExplanationOracle, OracleError};
use crate::AxiomSet;

pub const DEFAULT_MAX_PATHS: usize = 10_000;

const SUB_CLASS_OF: &str = "SubClassOf";
const EQUIVALENT_CLASSES: &str = "EquivalentClasses";

#[derive(Debug, Clone)]
pub struct HierarchyOracle {
    max_paths: usize,
}

impl HierarchyOracle {
    pub fn new(max_paths: usize) -> Self {
        Self { max_paths }
    }
}

impl Default for HierarchyOracle {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATHS)
    }
}

impl ExplanationOracle for HierarchyOracle {
    fn regular_generator<'a>(
        &'a self,
        background: &'a AxiomSet,
    ) -> Box<dyn ExplanationGenerator + 'a> {
        Box::new(HierarchyGenerator::new(background, false, self.max_paths))
    }

    fn laconic_generator<'a>(
        &'a self,
        justification: &'a AxiomSet,
    ) -> Box<dyn ExplanationGenerator + 'a> {
        Box::new(HierarchyGenerator::new(justification, true, self.max_paths))
    }
}

#[derive(Debug)]
struct Edge {
    to: String,
    /// The asserted axiom the edge comes from.
    source: Axiom,
    /// The weakest axiom that still yields this edge.
    weakened: Axiom,
}

struct HierarchyGenerator {
    edges: BTreeMap<String, Vec<Edge>>,
    laconic: bool,
    max_paths: usize,
}

fn sub_class_of(sub: &str, sup: &str) -> Axiom {
    Axiom::compound(
        SUB_CLASS_OF,
        vec![Term::Atom(sub.to_string()), Term::Atom(sup.to_string())],
    )
}

fn atom_pair(axiom: &Axiom) -> Option<(&str, &str)> {
    match axiom.args() {
        [sub, sup] => Some((sub.as_atom()?, sup.as_atom()?)),
        _ => None,
    }
}

impl HierarchyGenerator {
    fn new(axioms: &AxiomSet, laconic: bool, max_paths: usize) -> Self {
        let mut edges: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
        for axiom in axioms {
            match axiom.head() {
                SUB_CLASS_OF => {
                    if let Some((sub, sup)) = atom_pair(axiom) {
                        edges.entry(sub.to_string()).or_default().push(Edge {
                            to: sup.to_string(),
                            source: axiom.clone(),
                            weakened: axiom.clone(),
                        });
                    }
                }
                EQUIVALENT_CLASSES => {
                    let names: Option<Vec<&str>> =
                        axiom.args().iter().map(Term::as_atom).collect();
                    let Some(names) = names else { continue };
                    for (i, from) in names.iter().enumerate() {
                        for (j, to) in names.iter().enumerate() {
                            if i == j || from == to {
                                continue;
                            }
                            edges.entry(from.to_string()).or_default().push(Edge {
                                to: to.to_string(),
                                source: axiom.clone(),
                                weakened: sub_class_of(from, to),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
        Self {
            edges,
            laconic,
            max_paths,
        }
    }

    fn walk<'s>(
        &'s self,
        node: &str,
        target: &str,
        visited: &mut HashSet<&'s str>,
        path: &mut Vec<&'s Axiom>,
        found: &mut Vec<AxiomSet>,
    ) -> Result<(), OracleError> {
        if node == target {
            if found.len() >= self.max_paths {
                return Err(OracleError::ResourceExhausted(format!(
                    "more than {} subsumption paths",
                    self.max_paths
                )));
            }
            found.push(path.iter().map(|a| (*a).clone()).collect());
            return Ok(());
        }
        let Some(out) = self.edges.get(node) else {
            return Ok(());
        };
        for edge in out {
            if !visited.insert(edge.to.as_str()) {
                continue;
            }
            path.push(if self.laconic {
                &edge.weakened
            } else {
                &edge.source
            });
            let walked = self.walk(&edge.to, target, visited, path, found);
            path.pop();
            visited.remove(edge.to.as_str());
            walked?;
        }
        Ok(())
    }
}

/// Drop every set that strictly contains another one.
fn minimal_sets(sets: Vec<AxiomSet>) -> Vec<AxiomSet> {
    let unique: BTreeSet<AxiomSet> = sets.into_iter().collect();
    unique
        .iter()
        .filter(|candidate| {
            !unique
                .iter()
                .any(|other| other.len() < candidate.len() && other.is_subset(candidate))
        })
        .cloned()
        .collect()
}

impl ExplanationGenerator for HierarchyGenerator {
    fn explanations(
        &mut self,
        entailment: &Axiom,
        limit: usize,
    ) -> Result<BTreeSet<AxiomSet>, OracleError> {
        let pair = (entailment.head() == SUB_CLASS_OF)
            .then(|| atom_pair(entailment))
            .flatten();
        let Some((sub, sup)) = pair else {
            return Err(OracleError::InvalidArgument(format!(
                "only SubClassOf between named classes is supported, got {entailment}"
            )));
        };
        if sub == sup {
            return Ok(BTreeSet::new());
        }

        let mut visited = HashSet::from([sub]);
        let mut found = Vec::new();
        self.walk(sub, sup, &mut visited, &mut Vec::new(), &mut found)?;

        let mut minimal = minimal_sets(found);
        minimal.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        Ok(minimal.into_iter().take(limit).collect())
    }
}
