//! Watch mode: re-run the pipeline whenever project files change

use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use storyshots_common::{Error, Result};

use crate::config::StoryshotsConfig;
use crate::pipeline::{CycleReport, Pipeline};

/// Path components that never trigger a cycle by default
pub const DEFAULT_IGNORED: &[&str] = &["node_modules", "target", ".git"];

/// Drives pipeline cycles from file system changes under a root
#[derive(Debug, Clone)]
pub struct WatchController {
    root: PathBuf,
    ignored_names: Vec<String>,
    ignored_dirs: Vec<PathBuf>,
    debounce: Duration,
}

impl WatchController {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: absolute(root.as_ref()),
            ignored_names: DEFAULT_IGNORED.iter().map(|s| s.to_string()).collect(),
            ignored_dirs: Vec::new(),
            debounce: Duration::from_millis(200),
        }
    }

    /// Watch `root` with the ignore list and debounce window of `config`.
    /// The snapshot dir and the results file never trigger a cycle.
    pub fn from_config(root: impl AsRef<Path>, config: &StoryshotsConfig) -> Self {
        let mut controller = Self::new(root)
            .with_debounce(Duration::from_millis(config.watch.debounce_ms))
            .ignore_path(config.snapshot_dir());
        controller.ignored_names = config.watch.ignore.clone();
        if let Some(output) = &config.output {
            controller = controller.ignore_path(output);
        }
        controller
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Ignore everything at or below `path`
    pub fn ignore_path(mut self, path: impl AsRef<Path>) -> Self {
        self.ignored_dirs.push(absolute(path.as_ref()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let has_ignored_component = path.components().any(|c| match c {
            Component::Normal(name) => self
                .ignored_names
                .iter()
                .any(|ignored| name == ignored.as_str()),
            _ => false,
        });
        has_ignored_component || self.ignored_dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// Watch the root and run cycles until the watcher goes away.
    ///
    /// `on_cycle` sees every report; failed cycles never stop the loop.
    pub async fn run<F>(&self, pipeline: &mut Pipeline, on_cycle: F) -> Result<()>
    where
        F: FnMut(&CycleReport),
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if is_change(&event.kind) => {
                    for path in event.paths {
                        // Receiver gone means the controller is shutting down.
                        let _ = tx.send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Watcher error: {}", e),
            }
        })
        .map_err(|e| Error::Watch(e.to_string()))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(format!("{}: {}", self.root.display(), e)))?;

        info!("Storyshots is in watch mode.");
        self.drive(pipeline, rx, on_cycle).await;
        Ok(())
    }

    /// Run an initial cycle, then one cycle per burst of relevant changes.
    ///
    /// Cycles never overlap. Changes arriving during a cycle are collected
    /// after it finishes, together with anything else that arrives within
    /// the debounce window, and answered with exactly one further cycle.
    /// Returns when the event channel closes.
    pub async fn drive<F>(
        &self,
        pipeline: &mut Pipeline,
        mut events: mpsc::UnboundedReceiver<PathBuf>,
        mut on_cycle: F,
    ) where
        F: FnMut(&CycleReport),
    {
        on_cycle(&pipeline.run_cycle().await);

        while let Some(path) = events.recv().await {
            if self.is_ignored(&path) {
                continue;
            }
            debug!("change: {}", path.display());

            tokio::time::sleep(self.debounce).await;
            let mut coalesced = 0usize;
            while let Ok(path) = events.try_recv() {
                if !self.is_ignored(&path) {
                    coalesced += 1;
                }
            }
            if coalesced > 0 {
                debug!("coalesced {} further change(s)", coalesced);
            }

            info!("Change detected, re-running stories");
            on_cycle(&pipeline.run_cycle().await);
        }

        debug!("watch channel closed after {} cycle(s)", pipeline.cycles());
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Absolute form of `path`, canonicalized as far as it exists
fn absolute(path: &Path) -> PathBuf {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return path.to_path_buf(),
        }
    };
    for ancestor in path.ancestors() {
        if let Ok(canonical) = std::fs::canonicalize(ancestor) {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => canonical.join(rest),
                _ => canonical,
            };
        }
    }
    path
}
