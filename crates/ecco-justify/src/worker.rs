//! The worker side of isolated refinement.
//!
//! A worker reads the entailment and justification artifacts, refines every
//! logical entailment axiom against the justification and hands back the
//! laconic justifications it found. A watchdog bounds the whole run; in a
//! worker process ([`serve`]) firing exits the process.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::document::{parse_document, render_documents, DocumentError};
use crate::laconic::panic_message;
use crate::oracle::{ExplanationOracle, OracleError};
use crate::{AxiomSet, LaconicJustification};

/// Exit code of a worker stopped by its own watchdog.
pub const WATCHDOG_EXIT_CODE: i32 = 124;
/// Exit code of a worker that found no laconic justification.
pub const WORKER_EMPTY_EXIT_CODE: i32 = 1;
/// Exit code of a worker that could not process its unit.
pub const WORKER_FAILED_EXIT_CODE: i32 = 2;

/// Runs `on_fire` once after `delay` unless disarmed first.
pub struct Watchdog {
    disarm: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn arm(delay: Duration, on_fire: impl FnOnce() + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = thread::Builder::new()
            .name("ecco-watchdog".to_string())
            .spawn(move || {
                // a dropped sender means disarmed
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(delay) {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "watchdog fired");
                    flag.store(true, Ordering::SeqCst);
                    on_fire();
                }
            });
        match handle {
            Ok(handle) => Self {
                disarm: Some(tx),
                handle: Some(handle),
                fired,
            },
            Err(err) => {
                tracing::warn!(error = %err, "failed to start watchdog thread");
                Self {
                    disarm: None,
                    handle: None,
                    fired,
                }
            }
        }
    }

    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop the watchdog. Returns whether it fired first.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired()
    }

    fn stop(&mut self) {
        self.disarm.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Laconic justifications requested per entailment axiom.
    pub limit: usize,
    pub watchdog: Duration,
}

impl From<&EngineConfig> for WorkerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            limit: config.worker_limit,
            watchdog: config.worker_timeout(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed artifact {path}: {source}")]
    Document {
        path: PathBuf,
        source: DocumentError,
    },
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("watchdog fired after {0:?}")]
    TimedOut(Duration),
}

fn read_artifact(path: &Path) -> Result<AxiomSet, WorkerError> {
    let text = std::fs::read_to_string(path).map_err(|source| WorkerError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&text).map_err(|source| WorkerError::Document {
        path: path.to_path_buf(),
        source,
    })
}

/// One worker invocation: read both artifacts, refine under the watchdog.
///
/// Once the watchdog has fired nothing computed by this call is returned,
/// even if `on_timeout` let the process live on.
pub fn run_worker(
    oracle: &dyn ExplanationOracle,
    entailment_path: &Path,
    justification_path: &Path,
    settings: &WorkerSettings,
    on_timeout: impl FnOnce() + Send + 'static,
) -> Result<BTreeSet<LaconicJustification>, WorkerError> {
    let watchdog = Watchdog::arm(settings.watchdog, on_timeout);
    let entailments = read_artifact(entailment_path)?;
    let justification = read_artifact(justification_path)?;
    let laconic = refine_unit(oracle, &entailments, &justification, settings.limit);
    if watchdog.disarm() {
        return Err(WorkerError::TimedOut(settings.watchdog));
    }
    laconic
}

/// Body of the worker process; returns its exit code.
///
/// Stdout and stderr reach the parent as one stream, so nothing but the
/// documents may be written while reasoning. The default panic hook would
/// print skipped panics ahead of the output, hence the silent one.
pub fn serve(
    oracle: &dyn ExplanationOracle,
    entailment_path: &Path,
    justification_path: &Path,
    settings: &WorkerSettings,
) -> i32 {
    panic::set_hook(Box::new(|_| {}));
    let laconic = match run_worker(oracle, entailment_path, justification_path, settings, || {
        std::process::exit(WATCHDOG_EXIT_CODE);
    }) {
        Ok(laconic) => laconic,
        Err(WorkerError::TimedOut(_)) => return WATCHDOG_EXIT_CODE,
        Err(err) => {
            eprintln!("laconic worker failed: {err}");
            return WORKER_FAILED_EXIT_CODE;
        }
    };
    if laconic.is_empty() {
        return WORKER_EMPTY_EXIT_CODE;
    }

    let mut stdout = io::stdout().lock();
    match writeln!(stdout, "{}", render_documents(&laconic)).and_then(|_| stdout.flush()) {
        Ok(()) => 0,
        Err(_) => WORKER_FAILED_EXIT_CODE,
    }
}

/// Laconic justifications for every logical axiom of `entailments`, drawn
/// from `justification` with a single generator.
///
/// Axioms the oracle rejects as invalid or too expensive are skipped, as are
/// panics; any other oracle failure ends the unit.
pub fn refine_unit(
    oracle: &dyn ExplanationOracle,
    entailments: &AxiomSet,
    justification: &AxiomSet,
    limit: usize,
) -> Result<BTreeSet<LaconicJustification>, WorkerError> {
    let mut generator = oracle.laconic_generator(justification);
    let mut laconic = BTreeSet::new();
    for entailment in entailments.iter().filter(|ax| ax.is_logical()) {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            generator.explanations(entailment, limit)
        }));
        match attempt {
            Ok(Ok(sets)) => laconic.extend(sets),
            Ok(Err(err)) if err.is_skippable() => {
                tracing::debug!(entailment = %entailment, error = %err, "skipping entailment");
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(payload) => {
                tracing::debug!(
                    entailment = %entailment,
                    panic = %panic_message(payload.as_ref()),
                    "skipping entailment"
                );
            }
        }
    }
    Ok(laconic)
}
