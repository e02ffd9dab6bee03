//! Storyshots runner
//!
//! Loads a story catalog from a project's configuration, renders every
//! selected story and compares the output against recorded snapshots.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  WatchController (or a single invocation)                    │
//! │    └── Pipeline::run_cycle() -> CycleReport                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  CatalogLoader           direct | bundler                    │
//! │    └── ExecutionContext  fresh per load, module cache,       │
//! │                          globals, CatalogBuilder, addons     │
//! │  FilterSpec::apply       grep / exclude on `group/story`     │
//! │  SnapshotRunner::run     render -> compare -> record         │
//! │    ├── StoryRenderer     text templates, commands            │
//! │    ├── SnapshotStore     <dir>/<group>/<story><ext>          │
//! │    └── DecisionSource    interactive accept / reject         │
//! │  report::decide          RunResult -> Verdict                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod decision;
pub mod loader;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod runner;
pub mod sandbox;
pub mod snapshot;
pub mod transform;
pub mod watch;

pub use channel::{AddonChannel, AddonEvent};
pub use config::{LoaderConfig, LoaderKind, SnapshotConfig, StoryshotsConfig, WatchConfig};
pub use decision::{Decision, DecisionSource, ScriptedDecisions, TerminalPrompt};
pub use loader::{build_loader, load_catalog, CatalogLoader};
pub use pipeline::{CycleReport, Pipeline};
pub use render::{DefaultRenderer, StoryRenderer};
pub use report::{decide, write_results, Verdict};
pub use runner::{FailureKind, Outcome, RunOptions, RunResult, SnapshotRunner, StoryOutcome};
pub use snapshot::SnapshotStore;
pub use watch::WatchController;
