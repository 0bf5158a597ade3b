//! Laconic refinement in a separate worker process.
//!
//! The unit of work crosses the process boundary as two `Ontology(...)`
//! artifacts on disk. The worker writes its answer to stdout; stdout and
//! stderr share one capture file, and only output starting with
//! `Ontology(` counts as an answer. The parent kills a worker that outlives
//! its deadline, and the artifacts are removed when the call returns.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::axiom::Axiom;
use crate::config::{EngineConfig, ECCO_WORKER_LIMIT_ENV, ECCO_WORKER_TIMEOUT_MS_ENV};
use crate::document::{parse_documents, render_document, ONTOLOGY_MARKER};
use crate::laconic::{AbsentReason, RefinementOutcome, RefinementStrategy};
use crate::AxiomSet;

/// Subcommand that puts the executable into single-shot worker mode.
pub const WORKER_SUBCOMMAND: &str = "laconic-worker";

pub const ARTIFACT_EXTENSION: &str = "owl";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_NAME_ATTEMPTS: usize = 1024;

// ============================================================================
// Worker command
// ============================================================================

/// How to launch a worker: `<program> <args...> <entailment> <justification>`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// The running executable in worker mode.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(WORKER_SUBCOMMAND))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Hand the worker-side settings of `config` down through the environment.
    pub fn configured_from(self, config: &EngineConfig) -> Self {
        self.env(ECCO_WORKER_TIMEOUT_MS_ENV, config.worker_timeout_ms.to_string())
            .env(ECCO_WORKER_LIMIT_ENV, config.worker_limit.to_string())
    }

    fn command(&self, entailment: &Path, justification: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .arg(entailment)
            .arg(justification);
        cmd
    }
}

// ============================================================================
// Temporary artifacts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Entailment,
    Justification,
}

impl ArtifactKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Entailment => "ent",
            ArtifactKind::Justification => "just",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to create artifact directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write artifact {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("no free artifact name left in {0}")]
    Exhausted(PathBuf),
}

/// Hands out `<dir>/ent<N>.owl` and `<dir>/just<N>.owl`, one counter per kind.
#[derive(Debug)]
pub struct ArtifactAllocator {
    dir: PathBuf,
    entailments: AtomicU64,
    justifications: AtomicU64,
}

impl ArtifactAllocator {
    /// `dir` is resolved against the current working directory right away.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            dir: std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf()),
            entailments: AtomicU64::new(0),
            justifications: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn counter(&self, kind: ArtifactKind) -> &AtomicU64 {
        match kind {
            ArtifactKind::Entailment => &self.entailments,
            ArtifactKind::Justification => &self.justifications,
        }
    }

    pub fn write(&self, kind: ArtifactKind, axioms: &AxiomSet) -> Result<TempArtifact, ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let contents = render_document(axioms);

        for _ in 0..MAX_NAME_ATTEMPTS {
            let n = self.counter(kind).fetch_add(1, Ordering::Relaxed);
            let path = self
                .dir
                .join(format!("{}{n}.{ARTIFACT_EXTENSION}", kind.prefix()));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let artifact = TempArtifact { path };
                    file.write_all(contents.as_bytes())
                        .map_err(|source| ArtifactError::Write {
                            path: artifact.path.clone(),
                            source,
                        })?;
                    return Ok(artifact);
                }
                // left behind by another process sharing the directory
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ArtifactError::Write { path, source }),
            }
        }
        Err(ArtifactError::Exhausted(self.dir.clone()))
    }
}

/// A file owned by one isolated call; removed on drop.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove temporary artifact"
                );
            }
        }
    }
}

// ============================================================================
// Isolated refinement
// ============================================================================

pub struct IsolatedRefiner {
    command: WorkerCommand,
    artifacts: Arc<ArtifactAllocator>,
    deadline: Duration,
}

impl IsolatedRefiner {
    /// `deadline` bounds the whole worker lifetime as seen from the parent.
    pub fn new(command: WorkerCommand, artifacts: Arc<ArtifactAllocator>, deadline: Duration) -> Self {
        Self {
            command,
            artifacts,
            deadline,
        }
    }

    pub fn artifacts(&self) -> &ArtifactAllocator {
        &self.artifacts
    }

    /// Run the worker to completion. `None` means it was killed.
    fn run(&self, entailment: &Path, justification: &Path) -> io::Result<Option<String>> {
        let mut capture = tempfile::tempfile()?;
        let mut child = self
            .command
            .command(entailment, justification)
            .stdin(Stdio::null())
            .stdout(capture.try_clone()?)
            .stderr(capture.try_clone()?)
            .spawn()?;

        if !wait_with_deadline(&mut child, self.deadline)? {
            return Ok(None);
        }

        capture.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        capture.read_to_end(&mut bytes)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Poll until the child exits or `deadline` passes. Returns `false` if the
/// child had to be killed.
fn wait_with_deadline(child: &mut Child, deadline: Duration) -> io::Result<bool> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_status)) => return Ok(true),
            Ok(None) => {}
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        }
        if start.elapsed() > deadline {
            let _ = child.kill();
            child.wait()?;
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Interpret captured worker output.
pub fn parse_worker_output(output: &str) -> RefinementOutcome {
    if !output.starts_with(ONTOLOGY_MARKER) {
        return RefinementOutcome::Absent(AbsentReason::NoOutput);
    }
    match parse_documents(output) {
        Ok(documents) => RefinementOutcome::Refined(documents.into_iter().collect()),
        Err(err) => RefinementOutcome::Absent(AbsentReason::Unparsable(err.to_string())),
    }
}

impl RefinementStrategy for IsolatedRefiner {
    fn refine(&self, entailment: &Axiom, justification: &AxiomSet) -> RefinementOutcome {
        let written = self
            .artifacts
            .write(ArtifactKind::Entailment, &AxiomSet::from([entailment.clone()]))
            .and_then(|ent| {
                let just = self
                    .artifacts
                    .write(ArtifactKind::Justification, justification)?;
                Ok((ent, just))
            });
        let (ent, just) = match written {
            Ok(artifacts) => artifacts,
            Err(err) => {
                tracing::warn!(entailment = %entailment, error = %err, "failed to serialize refinement unit");
                return RefinementOutcome::Absent(AbsentReason::Serialization(err.to_string()));
            }
        };

        let started = Instant::now();
        let outcome = match self.run(ent.path(), just.path()) {
            Ok(Some(output)) => {
                let outcome = parse_worker_output(&output);
                if let RefinementOutcome::Absent(AbsentReason::Unparsable(err)) = &outcome {
                    tracing::warn!(entailment = %entailment, error = %err, "unparsable worker output");
                }
                outcome
            }
            Ok(None) => RefinementOutcome::Absent(AbsentReason::TimedOut),
            Err(err) => {
                tracing::warn!(entailment = %entailment, error = %err, "laconic worker process failed");
                RefinementOutcome::Absent(AbsentReason::Process(err.to_string()))
            }
        };
        tracing::debug!(
            entailment = %entailment,
            ent_artifact = %ent.path().display(),
            just_artifact = %just.path().display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            absent = outcome.is_absent(),
            "isolated refinement finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::set;

    #[test]
    fn counters_are_per_kind_and_start_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = ArtifactAllocator::new(dir.path());
        let axioms = set(&["SubClassOf(:A :B)"]);

        let e0 = alloc.write(ArtifactKind::Entailment, &axioms).unwrap();
        let j0 = alloc.write(ArtifactKind::Justification, &axioms).unwrap();
        let e1 = alloc.write(ArtifactKind::Entailment, &axioms).unwrap();
        assert_eq!(e0.path(), dir.path().join("ent0.owl"));
        assert_eq!(j0.path(), dir.path().join("just0.owl"));
        assert_eq!(e1.path(), dir.path().join("ent1.owl"));
        assert_eq!(
            fs::read_to_string(j0.path()).unwrap(),
            "Ontology(\nSubClassOf(:A :B)\n)"
        );
    }

    #[test]
    fn artifacts_disappear_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = ArtifactAllocator::new(dir.path());
        let path = {
            let artifact = alloc
                .write(ArtifactKind::Justification, &set(&["SubClassOf(:A :B)"]))
                .unwrap();
            assert!(artifact.path().exists());
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn existing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ent0.owl"), "foreign").unwrap();
        let alloc = ArtifactAllocator::new(dir.path());
        let artifact = alloc
            .write(ArtifactKind::Entailment, &set(&["SubClassOf(:A :B)"]))
            .unwrap();
        assert_eq!(artifact.path(), dir.path().join("ent1.owl"));
        assert_eq!(
            fs::read_to_string(dir.path().join("ent0.owl")).unwrap(),
            "foreign"
        );
    }

    #[test]
    fn concurrent_writers_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = Arc::new(ArtifactAllocator::new(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    (0..10)
                        .map(|_| {
                            alloc
                                .write(ArtifactKind::Entailment, &set(&["SubClassOf(:A :B)"]))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let artifacts: Vec<TempArtifact> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let names: std::collections::BTreeSet<_> =
            artifacts.iter().map(|a| a.path().to_path_buf()).collect();
        assert_eq!(names.len(), 80);
    }

    #[test]
    fn output_without_marker_is_absent() {
        assert_eq!(
            parse_worker_output(""),
            RefinementOutcome::Absent(AbsentReason::NoOutput)
        );
        assert_eq!(
            parse_worker_output("Exception in thread \"main\"\nOntology(\n)"),
            RefinementOutcome::Absent(AbsentReason::NoOutput)
        );
        assert!(matches!(
            parse_worker_output("Ontology(SubClassOf(:A"),
            RefinementOutcome::Absent(AbsentReason::Unparsable(_))
        ));
    }

    #[test]
    fn every_document_is_one_laconic_justification() {
        let output = "Ontology(\nSubClassOf(:A :B)\n)\nOntology(\nSubClassOf(:A :C)\nSubClassOf(:C :B)\n)\n";
        assert_eq!(
            parse_worker_output(output),
            RefinementOutcome::Refined(
                [
                    set(&["SubClassOf(:A :B)"]),
                    set(&["SubClassOf(:A :C)", "SubClassOf(:C :B)"])
                ]
                .into()
            )
        );
    }

    #[test]
    fn unwritable_directory_is_a_serialization_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let refiner = IsolatedRefiner::new(
            WorkerCommand::new("true"),
            Arc::new(ArtifactAllocator::new(blocker.join("temp"))),
            Duration::from_secs(5),
        );
        let outcome = refiner.refine(
            &crate::test_support::ax("SubClassOf(:A :B)"),
            &set(&["SubClassOf(:A :B)"]),
        );
        assert!(matches!(
            outcome,
            RefinementOutcome::Absent(AbsentReason::Serialization(_))
        ));
    }
}
