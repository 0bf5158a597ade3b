//! ecco CLI
//!
//! - `ecco justify`: regular (and optionally laconic) justifications for a
//!   batch of entailments against a knowledge base
//! - `ecco laconic-worker`: single-shot worker used by isolated refinement

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ecco_justify::worker;
use ecco_justify::{
    parse_document, Axiom, AxiomSet, BatchMode, EngineConfig, HierarchyOracle,
    JustificationEngine, LaconicScheduler, WorkerCommand, WorkerSettings,
};

/// Default log filter when `ECCO_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";
const LOG_ENV: &str = "ECCO_LOG";

#[derive(Parser)]
#[command(name = "ecco")]
#[command(author, version, about = "Justifications and laconic justifications for entailments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute justifications for every entailment in a file.
    Justify {
        /// Knowledge base as an `Ontology(...)` document
        #[arg(long)]
        ontology: PathBuf,
        /// Entailments to justify, as an `Ontology(...)` document
        #[arg(long)]
        entailments: PathBuf,
        /// Maximum justifications per entailment (defaults to the configured limit)
        #[arg(long)]
        limit: Option<usize>,
        /// Compute on the calling thread only
        #[arg(long)]
        sequential: bool,
        /// Also refine each entailment's justifications into laconic ones
        #[arg(long)]
        laconic: bool,
        /// JSON engine configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// Refine one unit of work in isolation (spawned by `justify --laconic`).
    #[command(name = "laconic-worker", hide = true)]
    LaconicWorker {
        entailment: PathBuf,
        justification: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Justify {
            ontology,
            entailments,
            limit,
            sequential,
            laconic,
            config,
            json,
        } => {
            init_logging();
            let config = load_config(config.as_deref())?;
            let mode = if sequential {
                BatchMode::Sequential
            } else {
                BatchMode::Parallel
            };
            cmd_justify(&ontology, &entailments, limit, mode, laconic, config, json)
        }
        // no subscriber: the parent reads our stderr together with stdout
        Commands::LaconicWorker {
            entailment,
            justification,
        } => std::process::exit(cmd_laconic_worker(&entailment, &justification)),
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn read_document(path: &Path) -> Result<AxiomSet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_document(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn cmd_justify(
    ontology: &Path,
    entailments: &Path,
    limit: Option<usize>,
    mode: BatchMode,
    laconic: bool,
    config: EngineConfig,
    json: bool,
) -> Result<()> {
    let background = read_document(ontology)?;
    let entailments: BTreeSet<Axiom> = read_document(entailments)?
        .into_iter()
        .filter(Axiom::is_logical)
        .collect();
    let limit = limit.unwrap_or(config.justification_limit);
    tracing::info!(
        ontology = %ontology.display(),
        axioms = background.len(),
        entailments = entailments.len(),
        limit,
        laconic,
        "loaded inputs"
    );

    let oracle = Arc::new(HierarchyOracle::default());
    let scheduler = if laconic {
        let worker = WorkerCommand::current_exe().context("failed to locate the ecco executable")?;
        Some(LaconicScheduler::new(oracle.clone(), &config, worker))
    } else {
        None
    };
    let engine = JustificationEngine::new(oracle, background, config);

    let report = engine.find_justifications_with_report(&entailments, limit, mode)?;
    let laconic = scheduler
        .as_ref()
        .map(|scheduler| scheduler.refine_all(&report.justifications));

    if json {
        let entries: Vec<serde_json::Value> = report
            .justifications
            .iter()
            .map(|(entailment, justs)| {
                let mut entry = serde_json::json!({
                    "entailment": entailment,
                    "justifications": justs,
                });
                if let Some(laconic) = &laconic {
                    entry["laconic"] = serde_json::json!(laconic.get(entailment));
                }
                entry
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (entailment, justs) in &report.justifications {
        println!("{}", entailment.to_string().bold());
        if justs.is_empty() {
            println!("  {}", "no justifications".yellow());
        }
        for (i, just) in justs.iter().enumerate() {
            println!("  {} {}", "justification".cyan(), i + 1);
            for axiom in just {
                println!("    {axiom}");
            }
        }
        if let Some(sets) = laconic.as_ref().and_then(|m| m.get(entailment)) {
            for (i, set) in sets.iter().enumerate() {
                println!("  {} {}", "laconic".green(), i + 1);
                for axiom in set {
                    println!("    {axiom}");
                }
            }
        }
    }
    eprintln!(
        "{} {} entailments, {} without justifications",
        "ok".green().bold(),
        report.justifications.len(),
        report.lookup_misses.len()
    );
    Ok(())
}

fn cmd_laconic_worker(entailment: &Path, justification: &Path) -> i32 {
    let config = match EngineConfig::default().with_env_overrides() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("laconic worker failed: {err}");
            return worker::WORKER_FAILED_EXIT_CODE;
        }
    };
    worker::serve(
        &HierarchyOracle::default(),
        entailment,
        justification,
        &WorkerSettings::from(&config),
    )
}
