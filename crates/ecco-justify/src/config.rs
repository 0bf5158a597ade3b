//! Engine configuration.
//!
//! Precedence: JSON file (optional) → environment overrides → defaults for
//! anything left unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ECCO_WORKER_TIMEOUT_MS_ENV: &str = "ECCO_WORKER_TIMEOUT_MS";
pub const ECCO_KILL_GRACE_MS_ENV: &str = "ECCO_KILL_GRACE_MS";
pub const ECCO_ARTIFACT_DIR_ENV: &str = "ECCO_ARTIFACT_DIR";
pub const ECCO_BATCH_THREADS_ENV: &str = "ECCO_BATCH_THREADS";
pub const ECCO_HEAVY_THRESHOLD_ENV: &str = "ECCO_HEAVY_THRESHOLD";
pub const ECCO_WORKER_LIMIT_ENV: &str = "ECCO_WORKER_LIMIT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Work units at or below this size are computed without splitting.
    pub leaf_threshold: usize,
    /// A justification with an axiom at least this complex goes to a worker process.
    pub heavy_threshold: usize,
    /// Default maximum number of justifications per entailment.
    pub justification_limit: usize,
    /// Maximum number of laconic justifications per in-process refinement.
    pub laconic_limit: usize,
    /// Maximum number of laconic justifications per entailment axiom inside a worker.
    pub worker_limit: usize,
    /// Worker-side watchdog delay.
    pub worker_timeout_ms: u64,
    /// Extra time the parent waits past the watchdog before killing the worker.
    pub kill_grace_ms: u64,
    /// Where temporary artifacts are written (relative to the working directory).
    pub artifact_dir: PathBuf,
    /// Threads for batch splitting; `None` uses rayon's default.
    pub batch_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            leaf_threshold: 10,
            heavy_threshold: 20,
            justification_limit: 10,
            laconic_limit: 10,
            worker_limit: 1,
            worker_timeout_ms: 500,
            kill_grace_ms: 1500,
            artifact_dir: PathBuf::from("temp"),
            batch_threads: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid {var}={value:?} (expected {expected})")]
    Env {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

impl EngineConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    /// How long the parent lets a worker run before killing it.
    pub fn kill_deadline(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms.saturating_add(self.kill_grace_ms))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ECCO_*` overrides. Empty values are ignored.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let read = |var: &'static str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = read(ECCO_WORKER_TIMEOUT_MS_ENV) {
            self.worker_timeout_ms = parse_number(ECCO_WORKER_TIMEOUT_MS_ENV, &v)?;
        }
        if let Some(v) = read(ECCO_KILL_GRACE_MS_ENV) {
            self.kill_grace_ms = parse_number(ECCO_KILL_GRACE_MS_ENV, &v)?;
        }
        if let Some(v) = read(ECCO_ARTIFACT_DIR_ENV) {
            self.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = read(ECCO_BATCH_THREADS_ENV) {
            self.batch_threads = Some(parse_number(ECCO_BATCH_THREADS_ENV, &v)?);
        }
        if let Some(v) = read(ECCO_HEAVY_THRESHOLD_ENV) {
            self.heavy_threshold = parse_number(ECCO_HEAVY_THRESHOLD_ENV, &v)?;
        }
        if let Some(v) = read(ECCO_WORKER_LIMIT_ENV) {
            self.worker_limit = parse_number(ECCO_WORKER_LIMIT_ENV, &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("leaf_threshold", self.leaf_threshold),
            ("justification_limit", self.justification_limit),
            ("laconic_limit", self.laconic_limit),
            ("worker_limit", self.worker_limit),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::Env {
        var,
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}
