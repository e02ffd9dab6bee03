//! One load → filter → run cycle

use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

use storyshots_common::{Error, FilterSpec, Result};

use crate::config::StoryshotsConfig;
use crate::decision::TerminalPrompt;
use crate::loader::{build_loader, load_catalog, CatalogLoader};
use crate::render::DefaultRenderer;
use crate::report::{decide, write_results, Verdict};
use crate::runner::{RunOptions, RunResult, SnapshotRunner};
use crate::snapshot::SnapshotStore;

/// Outcome of a single cycle
#[derive(Debug)]
pub struct CycleReport {
    /// 1-based cycle number
    pub cycle: u64,

    /// Run result, or the error that aborted the cycle
    pub outcome: std::result::Result<RunResult, Error>,

    pub verdict: Verdict,

    pub duration_ms: u64,
}

impl CycleReport {
    pub fn result(&self) -> Option<&RunResult> {
        self.outcome.as_ref().ok()
    }
}

/// Loader, filter and runner wired together for repeated cycles
pub struct Pipeline {
    loader: Box<dyn CatalogLoader>,
    filter: FilterSpec,
    runner: SnapshotRunner,
    output: Option<PathBuf>,
    cycles: u64,
}

impl Pipeline {
    pub fn new(loader: Box<dyn CatalogLoader>, filter: FilterSpec, runner: SnapshotRunner) -> Self {
        Self {
            loader,
            filter,
            runner,
            output: None,
            cycles: 0,
        }
    }

    /// Write each cycle's result as JSON to `path`
    pub fn with_output(mut self, path: Option<PathBuf>) -> Self {
        self.output = path;
        self
    }

    /// Build the pipeline described by `config`. Backend configuration is
    /// resolved here, once.
    pub fn from_config(config: &StoryshotsConfig) -> Result<Self> {
        config.validate()?;

        let loader = build_loader(config)?;
        let filter = FilterSpec::new(config.grep.as_deref(), config.exclude.as_deref())?;
        let store = SnapshotStore::new(config.snapshot_dir(), &config.snapshots.extension);
        let options = RunOptions {
            update: config.update,
            interactive: config.interactive,
            allow_create: !config.ci,
        };

        let mut runner = SnapshotRunner::new(store, Box::new(DefaultRenderer), options);
        if config.interactive {
            runner = runner.with_decisions(Box::new(TerminalPrompt::new()));
        }

        info!(
            "Using {} loader for {}, snapshots in {}",
            loader.strategy(),
            loader.entry().display(),
            runner.store().dir().display()
        );

        Ok(Self::new(loader, filter, runner).with_output(config.output.clone()))
    }

    pub fn runner(&self) -> &SnapshotRunner {
        &self.runner
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Load the catalog from scratch, filter it and run it.
    ///
    /// A load failure aborts only this cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let start = Instant::now();
        info!("Cycle {} started", self.cycles);

        let outcome = match load_catalog(self.loader.as_ref()).await {
            Ok(catalog) => {
                let runnable = self.filter.apply(&catalog);
                if !runnable.skipped().is_empty() {
                    info!("{} story(ies) filtered out", runnable.skipped().len());
                }
                Ok(self.runner.run(&runnable).await)
            }
            Err(e) => {
                error!("Failed to load stories: {}", e);
                Err(Error::from(e))
            }
        };

        let verdict = match &outcome {
            Ok(result) => {
                if let Some(path) = &self.output {
                    if let Err(e) = write_results(result, path) {
                        warn!("Failed to write results to {}: {}", path.display(), e);
                    }
                }
                decide(result)
            }
            Err(_) => Verdict::load_failed(),
        };

        CycleReport {
            cycle: self.cycles,
            outcome,
            verdict,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
