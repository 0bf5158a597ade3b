//! Laconic refinement of regular justifications.
//!
//! Each justification is routed either to an in-process strategy or to an
//! isolated worker process (see [`crate::isolated`]). All tasks of one call
//! run at once on a pool with one thread per justification. The aggregate is
//! best effort: a task that fails is recorded as [`RefinementOutcome::Absent`]
//! and contributes nothing, and its siblings carry on.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::axiom::Axiom;
use crate::config::EngineConfig;
use crate::isolated::{ArtifactAllocator, IsolatedRefiner, WorkerCommand};
use crate::oracle::{ExplanationOracle, OracleError};
use crate::{AxiomSet, Justification, JustificationMap, LaconicJustification, LaconicMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    InProcess,
    Isolated,
}

/// Heavy justifications (any axiom with at least `heavy_threshold` nested
/// expressions) are isolated; the rest stay in process.
pub fn classify(justification: &AxiomSet, heavy_threshold: usize) -> Route {
    if justification
        .iter()
        .any(|axiom| axiom.nested_expression_count() >= heavy_threshold)
    {
        Route::Isolated
    } else {
        Route::InProcess
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsentReason {
    Oracle(OracleError),
    Panicked(String),
    Serialization(String),
    Process(String),
    TimedOut,
    /// The worker exited without an `Ontology(` document on stdout.
    NoOutput,
    Unparsable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementOutcome {
    Refined(BTreeSet<LaconicJustification>),
    Absent(AbsentReason),
}

impl RefinementOutcome {
    pub fn is_absent(&self) -> bool {
        matches!(self, RefinementOutcome::Absent(_))
    }

    pub fn into_laconic(self) -> BTreeSet<LaconicJustification> {
        match self {
            RefinementOutcome::Refined(sets) => sets,
            RefinementOutcome::Absent(_) => BTreeSet::new(),
        }
    }
}

/// One way of turning a justification into laconic justifications.
pub trait RefinementStrategy: Send + Sync {
    fn refine(&self, entailment: &Axiom, justification: &AxiomSet) -> RefinementOutcome;
}

/// Refines on the calling thread with a generator scoped to one justification.
pub struct InProcessRefiner {
    oracle: Arc<dyn ExplanationOracle>,
    limit: usize,
}

impl InProcessRefiner {
    pub fn new(oracle: Arc<dyn ExplanationOracle>, limit: usize) -> Self {
        Self { oracle, limit }
    }
}

impl RefinementStrategy for InProcessRefiner {
    fn refine(&self, entailment: &Axiom, justification: &AxiomSet) -> RefinementOutcome {
        let mut generator = self.oracle.laconic_generator(justification);
        match generator.explanations(entailment, self.limit) {
            Ok(sets) => RefinementOutcome::Refined(sets),
            Err(err) => RefinementOutcome::Absent(AbsentReason::Oracle(err)),
        }
    }
}

pub type Router = Arc<dyn Fn(&AxiomSet) -> Route + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub justification: Justification,
    pub route: Route,
    pub outcome: RefinementOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefinementReport {
    pub laconic: BTreeSet<LaconicJustification>,
    /// One entry per input justification, sorted by justification.
    pub tasks: Vec<TaskReport>,
}

impl RefinementReport {
    pub fn absent(&self) -> usize {
        self.tasks.iter().filter(|t| t.outcome.is_absent()).count()
    }
}

pub struct LaconicScheduler {
    in_process: Arc<dyn RefinementStrategy>,
    isolated: Arc<dyn RefinementStrategy>,
    router: Router,
}

impl LaconicScheduler {
    /// Standard wiring: complexity routing, in-process oracle refinement and
    /// worker processes launched through `worker`.
    pub fn new(
        oracle: Arc<dyn ExplanationOracle>,
        config: &EngineConfig,
        worker: WorkerCommand,
    ) -> Self {
        let heavy_threshold = config.heavy_threshold;
        let worker = worker.configured_from(config);
        let isolated = IsolatedRefiner::new(
            worker,
            Arc::new(ArtifactAllocator::new(&config.artifact_dir)),
            config.kill_deadline(),
        );
        Self::with_strategies(
            Arc::new(InProcessRefiner::new(oracle, config.laconic_limit)),
            Arc::new(isolated),
            Arc::new(move |justification: &AxiomSet| classify(justification, heavy_threshold)),
        )
    }

    pub fn with_strategies(
        in_process: Arc<dyn RefinementStrategy>,
        isolated: Arc<dyn RefinementStrategy>,
        router: Router,
    ) -> Self {
        Self {
            in_process,
            isolated,
            router,
        }
    }

    pub fn route(&self, justification: &AxiomSet) -> Route {
        (self.router)(justification)
    }

    /// Union of the laconic justifications of every input justification.
    pub fn refine(
        &self,
        entailment: &Axiom,
        justifications: &BTreeSet<Justification>,
    ) -> BTreeSet<LaconicJustification> {
        self.refine_with_report(entailment, justifications).laconic
    }

    pub fn refine_with_report(
        &self,
        entailment: &Axiom,
        justifications: &BTreeSet<Justification>,
    ) -> RefinementReport {
        if justifications.is_empty() {
            return RefinementReport::default();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(justifications.len())
            .thread_name(|i| format!("ecco-laconic-{i}"))
            .build();
        let mut tasks = match pool {
            Ok(pool) => {
                let collected = Mutex::new(Vec::with_capacity(justifications.len()));
                pool.scope(|scope| {
                    for justification in justifications {
                        let collected = &collected;
                        scope.spawn(move |_| {
                            let report = self.run_task(entailment, justification);
                            collected.lock().push(report);
                        });
                    }
                });
                // nothing is left running, so the pool goes without waiting
                drop(pool);
                collected.into_inner()
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to build laconic pool; refining inline");
                justifications
                    .iter()
                    .map(|justification| self.run_task(entailment, justification))
                    .collect()
            }
        };
        tasks.sort_by(|a, b| a.justification.cmp(&b.justification));

        let laconic = tasks
            .iter()
            .filter_map(|task| match &task.outcome {
                RefinementOutcome::Refined(sets) => Some(sets.iter().cloned()),
                RefinementOutcome::Absent(_) => None,
            })
            .flatten()
            .collect();
        let report = RefinementReport { laconic, tasks };
        tracing::debug!(
            entailment = %entailment,
            justifications = justifications.len(),
            laconic = report.laconic.len(),
            absent = report.absent(),
            "laconic refinement finished"
        );
        report
    }

    /// Refine every entry of a batch result.
    pub fn refine_all(&self, justifications: &JustificationMap) -> LaconicMap {
        justifications
            .iter()
            .map(|(entailment, justs)| (entailment.clone(), self.refine(entailment, justs)))
            .collect()
    }

    fn run_task(&self, entailment: &Axiom, justification: &Justification) -> TaskReport {
        let route = self.route(justification);
        let strategy = match route {
            Route::InProcess => &self.in_process,
            Route::Isolated => &self.isolated,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            strategy.refine(entailment, justification)
        }))
        .unwrap_or_else(|payload| {
            RefinementOutcome::Absent(AbsentReason::Panicked(panic_message(payload.as_ref())))
        });
        if let RefinementOutcome::Absent(reason) = &outcome {
            tracing::debug!(
                entailment = %entailment,
                route = ?route,
                reason = ?reason,
                "no laconic justification for this justification"
            );
        }
        TaskReport {
            justification: justification.clone(),
            route,
            outcome,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ax, set, StubOracle};
    use std::collections::BTreeMap;

    /// Records which justifications it saw and answers with a marker axiom.
    struct Recording {
        marker: &'static str,
        seen: Mutex<Vec<AxiomSet>>,
    }

    impl Recording {
        fn new(marker: &'static str) -> Arc<Self> {
            Arc::new(Self {
                marker,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl RefinementStrategy for Recording {
        fn refine(&self, _entailment: &Axiom, justification: &AxiomSet) -> RefinementOutcome {
            self.seen.lock().push(justification.clone());
            RefinementOutcome::Refined(BTreeSet::from([set(&[self.marker])]))
        }
    }

    fn deep_axiom(depth: usize) -> Axiom {
        // SubClassOf(:A C(C(...C(:B)...))) has depth + 2 nested expressions
        let mut inner = ":B".to_string();
        for _ in 0..depth {
            inner = format!("ObjectComplementOf({inner})");
        }
        ax(&format!("SubClassOf(:A {inner})"))
    }

    #[test]
    fn classification_threshold_is_inclusive() {
        let heavy: AxiomSet = [deep_axiom(18), ax("SubClassOf(:X :Y)")].into();
        let light: AxiomSet = [deep_axiom(17), ax("SubClassOf(:X :Y)")].into();
        assert_eq!(deep_axiom(18).nested_expression_count(), 20);
        assert_eq!(deep_axiom(17).nested_expression_count(), 19);
        assert_eq!(classify(&heavy, 20), Route::Isolated);
        assert_eq!(classify(&light, 20), Route::InProcess);
    }

    #[test]
    fn routes_follow_the_router() {
        let in_process = Recording::new("SubClassOf(:Light :Done)");
        let isolated = Recording::new("SubClassOf(:Heavy :Done)");
        let heavy = set(&["SubClassOf(:Heavy :X)"]);
        let light = set(&["SubClassOf(:Light :X)"]);
        let heavy_key = heavy.clone();
        let scheduler = LaconicScheduler::with_strategies(
            in_process.clone(),
            isolated.clone(),
            Arc::new(move |j: &AxiomSet| {
                if *j == heavy_key {
                    Route::Isolated
                } else {
                    Route::InProcess
                }
            }),
        );

        let report = scheduler.refine_with_report(
            &ax("SubClassOf(:Q :X)"),
            &BTreeSet::from([heavy.clone(), light.clone()]),
        );
        assert_eq!(*isolated.seen.lock(), vec![heavy]);
        assert_eq!(*in_process.seen.lock(), vec![light]);
        assert_eq!(
            report.laconic,
            BTreeSet::from([
                set(&["SubClassOf(:Heavy :Done)"]),
                set(&["SubClassOf(:Light :Done)"])
            ])
        );
    }

    #[test]
    fn failures_do_not_hide_sibling_results() {
        let first = set(&["SubClassOf(:A :B)", "SubClassOf(:B :C)"]);
        let second = set(&["SubClassOf(:A :D)", "SubClassOf(:D :C)"]);
        let third = set(&["SubClassOf(:A :E)", "SubClassOf(:E :C)"]);
        let mut oracle = StubOracle::default();
        oracle
            .laconic
            .insert(first.clone(), BTreeSet::from([set(&["SubClassOf(:A :B)"])]));
        oracle
            .laconic
            .insert(third.clone(), BTreeSet::from([set(&["SubClassOf(:E :C)"])]));
        oracle.failing_justifications.insert(second.clone());

        let oracle = Arc::new(oracle);
        let scheduler = LaconicScheduler::with_strategies(
            Arc::new(InProcessRefiner::new(oracle.clone(), 5)),
            Recording::new("SubClassOf(:Never :Used)"),
            Arc::new(|_: &AxiomSet| Route::InProcess),
        );
        let report = scheduler.refine_with_report(
            &ax("SubClassOf(:A :C)"),
            &BTreeSet::from([first, second.clone(), third]),
        );
        assert_eq!(
            report.laconic,
            BTreeSet::from([set(&["SubClassOf(:A :B)"]), set(&["SubClassOf(:E :C)"])])
        );
        assert_eq!(report.absent(), 1);
        let failed = report
            .tasks
            .iter()
            .find(|t| t.justification == second)
            .unwrap();
        assert!(matches!(
            failed.outcome,
            RefinementOutcome::Absent(AbsentReason::Oracle(OracleError::InvalidArgument(_)))
        ));
        assert_eq!(oracle.generators(), 3);
    }

    #[test]
    fn panicking_tasks_are_absorbed() {
        let ok = set(&["SubClassOf(:A :B)"]);
        let boom = set(&["SubClassOf(:A :Z)"]);
        let mut oracle = StubOracle::default();
        oracle
            .laconic
            .insert(ok.clone(), BTreeSet::from([ok.clone()]));
        oracle.panicking_justifications.insert(boom.clone());

        let scheduler = LaconicScheduler::with_strategies(
            Arc::new(InProcessRefiner::new(Arc::new(oracle), 5)),
            Recording::new("SubClassOf(:Never :Used)"),
            Arc::new(|_: &AxiomSet| Route::InProcess),
        );
        let report =
            scheduler.refine_with_report(&ax("SubClassOf(:A :B)"), &BTreeSet::from([ok.clone(), boom]));
        assert_eq!(report.laconic, BTreeSet::from([ok]));
        assert!(report.tasks.iter().any(|t| matches!(
            &t.outcome,
            RefinementOutcome::Absent(AbsentReason::Panicked(msg)) if msg.contains("blew up")
        )));
    }

    #[test]
    fn empty_input_needs_no_pool() {
        let scheduler = LaconicScheduler::with_strategies(
            Recording::new("SubClassOf(:A :B)"),
            Recording::new("SubClassOf(:A :B)"),
            Arc::new(|_: &AxiomSet| Route::InProcess),
        );
        assert!(scheduler
            .refine(&ax("SubClassOf(:A :B)"), &BTreeSet::new())
            .is_empty());
    }

    #[test]
    fn refine_all_keeps_every_entailment() {
        let e1 = ax("SubClassOf(:A :C)");
        let e2 = ax("SubClassOf(:X :Y)");
        let just = set(&["SubClassOf(:A :B)", "SubClassOf(:B :C)"]);
        let mut oracle = StubOracle::default();
        oracle
            .laconic
            .insert(just.clone(), BTreeSet::from([just.clone()]));
        let scheduler = LaconicScheduler::with_strategies(
            Arc::new(InProcessRefiner::new(Arc::new(oracle), 5)),
            Recording::new("SubClassOf(:Never :Used)"),
            Arc::new(|_: &AxiomSet| Route::InProcess),
        );

        let map = BTreeMap::from([
            (e1.clone(), BTreeSet::from([just.clone()])),
            (e2.clone(), BTreeSet::new()),
        ]);
        let laconic = scheduler.refine_all(&map);
        assert_eq!(laconic[&e1], BTreeSet::from([just]));
        assert!(laconic[&e2].is_empty());
    }
}
