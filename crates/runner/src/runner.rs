//! Snapshot runner: renders each runnable story and compares it to its record

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use storyshots_common::{RenderError, RunnableSet, Story, StoryKey};

use crate::decision::{unified_diff, Decision, DecisionSource, SnapshotReview};
use crate::render::StoryRenderer;
use crate::snapshot::SnapshotStore;

/// Per-story outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Matched,
    Created,
    Updated,
    Errored,
    /// Recorded snapshot with no story behind it
    Unmatched,
}

/// Why a story ended up `errored`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Render,
    Mismatch,
    Rejected,
    MissingSnapshot,
    Storage,
}

/// Result of processing a single story or obsolete record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryOutcome {
    pub name: String,
    pub outcome: Outcome,
    pub failure: Option<FailureKind>,
    pub detail: Option<String>,
    pub duration_ms: u64,
}

impl StoryOutcome {
    fn new(name: String, outcome: Outcome) -> Self {
        Self {
            name,
            outcome,
            failure: None,
            detail: None,
            duration_ms: 0,
        }
    }

    fn errored(name: String, failure: FailureKind, detail: String) -> Self {
        Self {
            failure: Some(failure),
            detail: Some(detail),
            ..Self::new(name, Outcome::Errored)
        }
    }
}

/// Aggregated outcome of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub matched: usize,
    pub created: usize,
    pub updated: usize,
    pub errored: usize,
    pub unmatched: usize,
    pub duration_ms: u64,
    pub outcomes: Vec<StoryOutcome>,
}

impl RunResult {
    fn record(&mut self, outcome: StoryOutcome) {
        match outcome.outcome {
            Outcome::Matched => self.matched += 1,
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Errored => self.errored += 1,
            Outcome::Unmatched => self.unmatched += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Failing entries count toward the exit status
    pub fn failures(&self) -> usize {
        self.errored + self.unmatched
    }

    pub fn outcome_of(&self, name: &str) -> Option<&StoryOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

/// Snapshot policy for a run
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Overwrite differing snapshots without asking
    pub update: bool,

    /// Ask a decision source before overwriting; takes precedence over `update`
    pub interactive: bool,

    /// Record snapshots for stories that have none
    pub allow_create: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            update: false,
            interactive: false,
            allow_create: true,
        }
    }
}

/// Executes runnable stories against a snapshot store
pub struct SnapshotRunner {
    store: SnapshotStore,
    renderer: Box<dyn StoryRenderer>,
    decisions: Option<Box<dyn DecisionSource>>,
    options: RunOptions,
}

impl SnapshotRunner {
    pub fn new(store: SnapshotStore, renderer: Box<dyn StoryRenderer>, options: RunOptions) -> Self {
        Self {
            store,
            renderer,
            decisions: None,
            options,
        }
    }

    /// Decision source consulted when `interactive` is set
    pub fn with_decisions(mut self, decisions: Box<dyn DecisionSource>) -> Self {
        self.decisions = Some(decisions);
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn options(&self) -> RunOptions {
        self.options
    }

    /// Process every story in order, then report obsolete records.
    ///
    /// Never fails; per-story problems become `errored` outcomes.
    pub async fn run(&mut self, runnable: &RunnableSet) -> RunResult {
        let start = Instant::now();
        let mut result = RunResult::default();
        let mut visited: BTreeSet<PathBuf> = BTreeSet::new();

        info!("Running {} story(ies)...", runnable.len());

        for (key, story) in runnable.catalog().iter() {
            visited.insert(self.store.path_for(&key));
            let story_start = Instant::now();
            let mut outcome = self.run_story(&key, story).await;
            outcome.duration_ms = story_start.elapsed().as_millis() as u64;

            match outcome.outcome {
                Outcome::Errored => error!(
                    "✗ {} - {}",
                    outcome.name,
                    outcome.detail.as_deref().unwrap_or("unknown error")
                ),
                other => debug!("✓ {} ({:?}, {} ms)", outcome.name, other, outcome.duration_ms),
            }
            result.record(outcome);
        }

        // Records of filtered-out stories are not obsolete.
        for key in runnable.skipped() {
            visited.insert(self.store.path_for(key));
        }

        for path in self.store.list_records() {
            if visited.contains(&path) {
                continue;
            }
            let name = self.store.record_name(&path);
            warn!("Obsolete snapshot: {} ({})", name, path.display());
            result.record(StoryOutcome {
                detail: Some(format!("no story for {}", path.display())),
                ..StoryOutcome::new(name, Outcome::Unmatched)
            });
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Stories: {} matched, {} created, {} updated, {} errored, {} unmatched ({} ms)",
            result.matched,
            result.created,
            result.updated,
            result.errored,
            result.unmatched,
            result.duration_ms
        );
        result
    }

    async fn run_story(&mut self, key: &StoryKey, story: &Story) -> StoryOutcome {
        let name = key.to_string();

        let rendered = match self.render_isolated(key, story).await {
            Ok(rendered) => rendered,
            Err(e) => return StoryOutcome::errored(name, FailureKind::Render, e.to_string()),
        };

        let recorded = match self.store.read(key) {
            Ok(recorded) => recorded,
            Err(e) => {
                return StoryOutcome::errored(
                    name,
                    FailureKind::Storage,
                    format!("cannot read snapshot: {}", e),
                )
            }
        };

        match recorded {
            None if self.options.allow_create => self.write(name, key, &rendered, Outcome::Created),
            None => StoryOutcome::errored(
                name,
                FailureKind::MissingSnapshot,
                format!("no snapshot at {}", self.store.path_for(key).display()),
            ),
            Some(recorded) if recorded == rendered => StoryOutcome::new(name, Outcome::Matched),
            Some(recorded) => {
                if self.options.interactive {
                    let decision = match self.decisions.as_mut() {
                        Some(source) => {
                            let review = SnapshotReview {
                                key,
                                recorded: &recorded,
                                rendered: &rendered,
                            };
                            source.decide(&review).await
                        }
                        None => Decision::Reject,
                    };
                    match decision {
                        Decision::Accept => self.write(name, key, &rendered, Outcome::Updated),
                        Decision::Reject => StoryOutcome::errored(
                            name,
                            FailureKind::Rejected,
                            unified_diff(&recorded, &rendered),
                        ),
                    }
                } else if self.options.update {
                    self.write(name, key, &rendered, Outcome::Updated)
                } else {
                    StoryOutcome::errored(
                        name,
                        FailureKind::Mismatch,
                        unified_diff(&recorded, &rendered),
                    )
                }
            }
        }
    }

    /// Render one story; a panicking renderer becomes a render error.
    async fn render_isolated(&self, key: &StoryKey, story: &Story) -> Result<String, RenderError> {
        match AssertUnwindSafe(self.renderer.render(key, story))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(RenderError::Panicked(message))
            }
        }
    }

    fn write(&self, name: String, key: &StoryKey, rendered: &str, outcome: Outcome) -> StoryOutcome {
        match self.store.write(key, rendered) {
            Ok(path) => {
                info!("{:?} snapshot {}", outcome, path.display());
                StoryOutcome::new(name, outcome)
            }
            Err(e) => StoryOutcome::errored(
                name,
                FailureKind::Storage,
                format!("cannot write snapshot: {}", e),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::ScriptedDecisions;
    use crate::render::DefaultRenderer;
    use async_trait::async_trait;
    use storyshots_common::{FilterSpec, RenderDescriptor, StoryCatalog};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn text_story(name: &str, template: &str) -> Story {
        Story {
            name: name.to_string(),
            render: RenderDescriptor::Text {
                template: template.to_string(),
            },
            parameters: BTreeMap::new(),
        }
    }

    fn runnable(stories: &[(&str, &str, &str)]) -> RunnableSet {
        let mut catalog = StoryCatalog::new();
        for (kind, name, template) in stories {
            catalog.insert(kind, text_story(name, template)).unwrap();
        }
        FilterSpec::default().apply(&catalog)
    }

    fn runner(tmp: &TempDir, options: RunOptions) -> SnapshotRunner {
        SnapshotRunner::new(
            SnapshotStore::new(tmp.path().join("__storyshots__"), ".shot"),
            Box::new(DefaultRenderer),
            options,
        )
    }

    #[tokio::test]
    async fn test_created_then_matched() {
        let tmp = TempDir::new().unwrap();
        let set = runnable(&[("Button", "primary", "<button/>")]);
        let mut runner = runner(&tmp, RunOptions::default());

        let first = runner.run(&set).await;
        assert_eq!(first.created, 1);
        assert_eq!(
            runner.store().read(&StoryKey::new("Button", "primary")).unwrap().as_deref(),
            Some("<button/>")
        );

        let second = runner.run(&set).await;
        assert_eq!(second.matched, 1);
        assert_eq!(second.failures(), 0);
    }

    #[tokio::test]
    async fn test_changed_output_errors_without_update() {
        let tmp = TempDir::new().unwrap();
        let mut runner = runner(&tmp, RunOptions::default());
        runner.run(&runnable(&[("Button", "primary", "old")])).await;

        let result = runner.run(&runnable(&[("Button", "primary", "new")])).await;
        assert_eq!(result.errored, 1);
        let outcome = result.outcome_of("Button/primary").unwrap();
        assert_eq!(outcome.failure, Some(FailureKind::Mismatch));
        assert!(outcome.detail.as_deref().unwrap().contains("+new"));
        assert_eq!(
            runner.store().read(&StoryKey::new("Button", "primary")).unwrap().as_deref(),
            Some("old")
        );
    }

    #[tokio::test]
    async fn test_update_overwrites() {
        let tmp = TempDir::new().unwrap();
        runner(&tmp, RunOptions::default())
            .run(&runnable(&[("Button", "primary", "old")]))
            .await;

        let mut updating = runner(
            &tmp,
            RunOptions {
                update: true,
                ..Default::default()
            },
        );
        let result = updating.run(&runnable(&[("Button", "primary", "new")])).await;
        assert_eq!(result.updated, 1);
        assert_eq!(
            updating.store().read(&StoryKey::new("Button", "primary")).unwrap().as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn test_interactive_accept_and_reject() {
        let tmp = TempDir::new().unwrap();
        runner(&tmp, RunOptions::default())
            .run(&runnable(&[("A", "one", "1"), ("A", "two", "2")]))
            .await;

        let mut interactive = runner(
            &tmp,
            RunOptions {
                interactive: true,
                update: true,
                ..Default::default()
            },
        )
        .with_decisions(Box::new(ScriptedDecisions::new([
            Decision::Accept,
            Decision::Reject,
        ])));
        let result = interactive
            .run(&runnable(&[("A", "one", "1!"), ("A", "two", "2!")]))
            .await;

        assert_eq!(result.updated, 1);
        assert_eq!(result.errored, 1);
        assert_eq!(
            result.outcome_of("A/two").unwrap().failure,
            Some(FailureKind::Rejected)
        );
        assert_eq!(
            interactive.store().read(&StoryKey::new("A", "two")).unwrap().as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_missing_snapshot_without_create() {
        let tmp = TempDir::new().unwrap();
        let mut strict = runner(
            &tmp,
            RunOptions {
                allow_create: false,
                ..Default::default()
            },
        );
        let result = strict.run(&runnable(&[("Button", "primary", "x")])).await;
        assert_eq!(result.errored, 1);
        assert_eq!(
            result.outcomes[0].failure,
            Some(FailureKind::MissingSnapshot)
        );
        assert!(strict.store().list_records().is_empty());
    }

    #[tokio::test]
    async fn test_render_failures_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let set = runnable(&[
            ("S", "a", "a"),
            ("S", "b", "{{missing}}"),
            ("S", "c", "c"),
            ("S", "d", "{{also_missing}}"),
            ("S", "e", "e"),
        ]);
        let result = runner(&tmp, RunOptions::default()).run(&set).await;

        assert_eq!(result.total(), 5);
        assert_eq!(result.created, 3);
        assert_eq!(result.errored, 2);
        let names: Vec<&str> = result.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["S/a", "S/b", "S/c", "S/d", "S/e"]);
    }

    struct PanickingRenderer;

    #[async_trait]
    impl StoryRenderer for PanickingRenderer {
        async fn render(&self, key: &StoryKey, story: &Story) -> Result<String, RenderError> {
            if story.name == "boom" {
                panic!("renderer exploded on {}", key);
            }
            Ok(story.name.clone())
        }
    }

    #[tokio::test]
    async fn test_renderer_panic_recorded_as_errored() {
        let tmp = TempDir::new().unwrap();
        let mut runner = SnapshotRunner::new(
            SnapshotStore::new(tmp.path(), ".shot"),
            Box::new(PanickingRenderer),
            RunOptions::default(),
        );
        let result = runner
            .run(&runnable(&[("P", "boom", ""), ("P", "fine", "")]))
            .await;

        assert_eq!(result.errored, 1);
        assert_eq!(result.created, 1);
        let detail = result.outcome_of("P/boom").unwrap().detail.clone().unwrap();
        assert!(detail.contains("renderer exploded on P/boom"));
    }

    #[tokio::test]
    async fn test_obsolete_snapshot_reported_not_deleted() {
        let tmp = TempDir::new().unwrap();
        let mut runner = runner(&tmp, RunOptions::default());
        runner
            .run(&runnable(&[("Button", "primary", "p"), ("Button", "gone", "g")]))
            .await;

        let result = runner.run(&runnable(&[("Button", "primary", "p")])).await;
        assert_eq!(result.matched, 1);
        assert_eq!(result.unmatched, 1);
        assert_eq!(
            result.outcome_of("Button/gone").unwrap().outcome,
            Outcome::Unmatched
        );
        assert!(runner.store().path_for(&StoryKey::new("Button", "gone")).exists());
    }

    #[tokio::test]
    async fn test_filtered_out_snapshots_are_not_obsolete() {
        let tmp = TempDir::new().unwrap();
        let mut catalog = StoryCatalog::new();
        catalog.insert("Button", text_story("primary", "p")).unwrap();
        catalog.insert("Input", text_story("empty", "e")).unwrap();

        let mut runner = runner(&tmp, RunOptions::default());
        runner.run(&FilterSpec::default().apply(&catalog)).await;

        let only_buttons = FilterSpec::new(Some("^Button/"), None).unwrap();
        let result = runner.run(&only_buttons.apply(&catalog)).await;
        assert_eq!(result.matched, 1);
        assert_eq!(result.unmatched, 0);
        assert_eq!(result.total(), 1);
    }
}
