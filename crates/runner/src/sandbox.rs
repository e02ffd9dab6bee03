//! Isolated evaluation of story modules
//!
//! A story module is a YAML (or JSON) document. Its keys are applied in a
//! fixed order, mirroring the statement order of a typical story config:
//!
//! ```text
//! globals:   { name: value }          merged into the context globals
//! addons:    [{ event, payload }]     emitted on the addon channel
//! require:   [./stories/button]       evaluated once per context
//! stories:   [{ kind, stories: [..] }] registered on the catalog builder
//! ```
//!
//! Every [`ExecutionContext`] owns its module cache, its globals and the
//! builder that captures registrations. Dropping the context drops all of it,
//! so a new context always re-reads and re-transforms every module.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use storyshots_common::{CommandSpec, LoadError, RenderDescriptor, Story, StoryCatalog};

use crate::channel::AddonChannel;
use crate::transform::{Loaders, SourceTransform};

/// Extensions tried, in order, for a specifier without one
const RESOLVE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Module tried when a specifier names a directory
const INDEX_MODULE: &str = "index.yaml";

/// Globals present in every fresh context
pub const DEFAULT_GLOBALS: [(&str, &str); 1] = [("user_agent", "storyshots")];

/// Where a piece of source code is considered to live.
///
/// The file does not have to exist; relative `require` entries resolve from
/// `resolution_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOrigin {
    pub filename: PathBuf,
    pub resolution_dir: PathBuf,
}

impl ModuleOrigin {
    pub fn new(filename: impl Into<PathBuf>, resolution_dir: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            resolution_dir: resolution_dir.into(),
        }
    }

    /// Origin of a file on disk, resolving from its parent directory
    pub fn for_file(path: &Path) -> Self {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(path, dir)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleSource {
    #[serde(default)]
    globals: BTreeMap<String, String>,
    #[serde(default)]
    addons: Vec<AddonEmit>,
    #[serde(default)]
    require: Vec<String>,
    #[serde(default)]
    stories: Vec<GroupSource>,
}

#[derive(Debug, Deserialize)]
struct AddonEmit {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupSource {
    kind: String,
    #[serde(default)]
    stories: Vec<StorySource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorySource {
    name: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    command: Option<CommandSpec>,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
}

impl ModuleSource {
    fn parse(path: &Path, source: &str) -> Result<Self, LoadError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(source).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl StorySource {
    fn into_story(self, kind: &str, origin: &ModuleOrigin) -> Result<Story, LoadError> {
        let invalid = |name: &str, reason: &str| LoadError::InvalidStory {
            kind: kind.to_string(),
            name: name.to_string(),
            path: origin.filename.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid(&self.name, "story name must not be empty"));
        }

        let render = match (self.text, self.command) {
            (Some(template), None) => RenderDescriptor::Text { template },
            (None, Some(mut command)) => {
                if command.program.trim().is_empty() {
                    return Err(invalid(&self.name, "command program must not be empty"));
                }
                command.cwd = Some(match command.cwd.take() {
                    Some(cwd) if cwd.is_absolute() => cwd,
                    Some(cwd) => origin.resolution_dir.join(cwd),
                    None => origin.resolution_dir.clone(),
                });
                RenderDescriptor::Command(command)
            }
            (Some(_), Some(_)) => {
                return Err(invalid(&self.name, "declare either 'text' or 'command', not both"))
            }
            (None, None) => return Err(invalid(&self.name, "missing 'text' or 'command'")),
        };

        Ok(Story {
            name: self.name,
            render,
            parameters: self.parameters,
        })
    }
}

/// Captures story registrations made during one evaluation
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: StoryCatalog,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a story; names must be unique within their group.
    pub fn register(&mut self, kind: &str, story: Story) -> Result<(), LoadError> {
        self.catalog
            .insert(kind, story)
            .map_err(|story| LoadError::DuplicateStory {
                kind: kind.to_string(),
                name: story.name,
            })
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn finish(self) -> StoryCatalog {
        self.catalog
    }
}

/// Module cache, globals and registration target for one catalog load
pub struct ExecutionContext {
    root: PathBuf,
    globals: BTreeMap<String, String>,
    modules: HashSet<PathBuf>,
    transform: Arc<dyn SourceTransform>,
    loaders: Loaders,
    channel: Option<AddonChannel>,
    builder: CatalogBuilder,
}

impl ExecutionContext {
    /// Create an empty context resolving from `root`
    pub fn new(root: impl Into<PathBuf>, transform: Arc<dyn SourceTransform>) -> Self {
        Self {
            root: root.into(),
            globals: DEFAULT_GLOBALS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            modules: HashSet::new(),
            transform,
            loaders: Loaders::default(),
            channel: None,
            builder: CatalogBuilder::new(),
        }
    }

    pub fn with_loaders(mut self, loaders: Loaders) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn with_channel(mut self, channel: AddonChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn globals(&self) -> &BTreeMap<String, String> {
        &self.globals
    }

    /// Number of modules evaluated (or being evaluated) in this context
    pub fn cached_modules(&self) -> usize {
        self.modules.len()
    }

    /// Record `path` as evaluated so later requires of it are no-ops.
    /// Returns false if it was already recorded.
    pub fn mark_evaluated(&mut self, path: &Path) -> bool {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.modules.insert(path)
    }

    /// Stories registered so far
    pub fn registered(&self) -> usize {
        self.builder.len()
    }

    /// Evaluate already-transformed `source` as if it were `origin.filename`.
    ///
    /// Errors from the module or anything it requires are returned unchanged.
    pub fn evaluate(&mut self, source: &str, origin: &ModuleOrigin) -> Result<(), LoadError> {
        let module = ModuleSource::parse(&origin.filename, source)?;
        debug!(
            "evaluating {} ({} require, {} groups)",
            origin.filename.display(),
            module.require.len(),
            module.stories.len()
        );

        self.globals.extend(module.globals);
        self.emit(module.addons)?;

        for specifier in &module.require {
            self.require(specifier, &origin.resolution_dir)?;
        }

        for group in module.stories {
            for story in group.stories {
                let story = story.into_story(&group.kind, origin)?;
                self.builder.register(&group.kind, story)?;
            }
        }
        Ok(())
    }

    /// Read, transform and evaluate a module file.
    ///
    /// A module already seen by this context is skipped, which also breaks
    /// require cycles.
    pub fn require(&mut self, specifier: &str, from_dir: &Path) -> Result<(), LoadError> {
        let path = self.resolve(specifier, from_dir)?;
        if !self.modules.insert(path.clone()) {
            debug!("{} already evaluated", path.display());
            return Ok(());
        }

        let raw = match self.loaders.run(&path)? {
            Some(source) => source,
            None => std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
                path: path.clone(),
                source,
            })?,
        };
        let source = self.transform.transform(&path, &raw, &self.globals)?;
        self.evaluate(&source, &ModuleOrigin::for_file(&path))
    }

    /// Resolve a specifier the way `require` does, without evaluating it
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, LoadError> {
        let base = if from_dir.is_absolute() {
            from_dir.to_path_buf()
        } else {
            self.root.join(from_dir)
        };
        let candidate = base.join(specifier);

        let found = if candidate.is_file() {
            Some(candidate.clone())
        } else if candidate.is_dir() && candidate.join(INDEX_MODULE).is_file() {
            Some(candidate.join(INDEX_MODULE))
        } else {
            RESOLVE_EXTENSIONS
                .iter()
                .copied()
                .chain(self.loaders.extensions())
                .map(|ext| with_extension_appended(&candidate, ext))
                .find(|p| p.is_file())
        };

        match found {
            Some(path) => Ok(std::fs::canonicalize(&path).unwrap_or(path)),
            None => Err(LoadError::ModuleNotFound {
                specifier: specifier.to_string(),
                from: base,
            }),
        }
    }

    /// Evaluate a self-contained bundle and return its stories directly.
    ///
    /// Registrations go to a builder local to this call, not to the context.
    pub fn evaluate_bundle(
        &mut self,
        source: &str,
        origin: &ModuleOrigin,
    ) -> Result<StoryCatalog, LoadError> {
        let source = self
            .transform
            .transform(&origin.filename, source, &self.globals)?;
        let module = ModuleSource::parse(&origin.filename, &source)?;
        if !module.require.is_empty() {
            return Err(LoadError::Bundle(format!(
                "{} is not self-contained (requires {})",
                origin.filename.display(),
                module.require.join(", ")
            )));
        }

        self.globals.extend(module.globals);
        self.emit(module.addons)?;

        let mut builder = CatalogBuilder::new();
        for group in module.stories {
            for story in group.stories {
                builder.register(&group.kind, story.into_story(&group.kind, origin)?)?;
            }
        }
        Ok(builder.finish())
    }

    /// Hand over everything registered through [`evaluate`](Self::evaluate)
    pub fn into_catalog(self) -> StoryCatalog {
        self.builder.finish()
    }

    fn emit(&self, addons: Vec<AddonEmit>) -> Result<(), LoadError> {
        for addon in addons {
            match &self.channel {
                Some(channel) => channel.emit(&addon.event, addon.payload),
                None => return Err(LoadError::ChannelMissing(addon.event)),
            }
        }
        Ok(())
    }
}

fn with_extension_appended(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Interpolator;
    use tempfile::TempDir;

    fn context(root: &Path) -> ExecutionContext {
        ExecutionContext::new(root, Arc::new(Interpolator::default()))
            .with_channel(AddonChannel::new())
    }

    fn ids(catalog: &StoryCatalog) -> Vec<String> {
        catalog.keys().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_evaluate_in_memory_source_with_relative_require() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("stories")).unwrap();
        std::fs::write(
            tmp.path().join("stories/button.yaml"),
            "stories:\n  - kind: Button\n    stories:\n      - name: primary\n        text: <button/>\n",
        )
        .unwrap();

        let mut ctx = context(tmp.path());
        let origin = ModuleOrigin::new(tmp.path().join("virtual.yaml"), tmp.path());
        ctx.evaluate(
            "require: [./stories/button]\nstories:\n  - kind: Link\n    stories:\n      - name: plain\n        text: <a/>\n",
            &origin,
        )
        .unwrap();

        assert_eq!(ctx.cached_modules(), 1);
        assert_eq!(ids(&ctx.into_catalog()), vec!["Button/primary", "Link/plain"]);
    }

    #[test]
    fn test_module_evaluated_once_per_context() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("shared.yaml"),
            "stories:\n  - kind: Shared\n    stories:\n      - name: one\n        text: x\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("a.yaml"), "require: [./shared.yaml]\n").unwrap();

        let mut ctx = context(tmp.path());
        ctx.evaluate(
            "require: [./a, ./shared]\n",
            &ModuleOrigin::new(tmp.path().join("config.yaml"), tmp.path()),
        )
        .unwrap();
        assert_eq!(ctx.registered(), 1);
    }

    #[test]
    fn test_require_cycle_terminates() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.yaml"), "require: [./b]\n").unwrap();
        std::fs::write(
            tmp.path().join("b.yaml"),
            "require: [./a]\nstories:\n  - kind: B\n    stories:\n      - name: b\n        text: b\n",
        )
        .unwrap();

        let mut ctx = context(tmp.path());
        ctx.require("./a", tmp.path()).unwrap();
        assert_eq!(ctx.cached_modules(), 2);
        assert_eq!(ctx.registered(), 1);
    }

    #[test]
    fn test_errors_propagate_unchanged() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(tmp.path());
        let err = ctx
            .evaluate(
                "require: [./missing]\n",
                &ModuleOrigin::new(tmp.path().join("config.yaml"), tmp.path()),
            )
            .unwrap_err();
        assert!(matches!(err, LoadError::ModuleNotFound { ref specifier, .. } if specifier == "./missing"));
    }

    #[test]
    fn test_duplicate_story_is_load_error() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(tmp.path());
        let source = "stories:\n  - kind: Button\n    stories:\n      - name: a\n        text: x\n      - name: a\n        text: y\n";
        let err = ctx
            .evaluate(source, &ModuleOrigin::new("config.yaml", tmp.path()))
            .unwrap_err();
        assert!(matches!(err, LoadError::DuplicateStory { .. }));
    }

    #[test]
    fn test_story_needs_exactly_one_render() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(tmp.path());
        let err = ctx
            .evaluate(
                "stories:\n  - kind: Button\n    stories:\n      - name: a\n",
                &ModuleOrigin::new("config.yaml", tmp.path()),
            )
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidStory { .. }));
    }

    #[test]
    fn test_command_cwd_resolves_from_module_dir() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(tmp.path());
        let dir = tmp.path().join("nested");
        ctx.evaluate(
            "stories:\n  - kind: Cli\n    stories:\n      - name: help\n        command:\n          program: echo\n          cwd: fixtures\n",
            &ModuleOrigin::new(dir.join("config.yaml"), &dir),
        )
        .unwrap();

        let catalog = ctx.into_catalog();
        let (_, story) = catalog.iter().next().unwrap();
        match &story.render {
            RenderDescriptor::Command(spec) => {
                assert_eq!(spec.cwd.as_deref(), Some(dir.join("fixtures").as_path()))
            }
            other => panic!("unexpected descriptor: {other:?}"),
        }
    }

    #[test]
    fn test_addons_require_channel() {
        let tmp = TempDir::new().unwrap();
        let source = "addons:\n  - event: setOptions\n    payload: {name: demo}\n";
        let origin = ModuleOrigin::new("config.yaml", tmp.path());

        let mut bare = ExecutionContext::new(tmp.path(), Arc::new(Interpolator::default()));
        assert!(matches!(
            bare.evaluate(source, &origin),
            Err(LoadError::ChannelMissing(_))
        ));

        let channel = AddonChannel::new();
        let mut ctx = ExecutionContext::new(tmp.path(), Arc::new(Interpolator::default()))
            .with_channel(channel.clone());
        ctx.evaluate(source, &origin).unwrap();
        assert_eq!(channel.events()[0].event, "setOptions");
    }

    #[test]
    fn test_globals_feed_later_transforms() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("stories.yaml"),
            "stories:\n  - kind: Theme\n    stories:\n      - name: ${theme}\n        text: ${user_agent}\n",
        )
        .unwrap();

        let mut ctx = context(tmp.path());
        ctx.evaluate(
            "globals: {theme: dark}\nrequire: [./stories]\n",
            &ModuleOrigin::new("config.yaml", tmp.path()),
        )
        .unwrap();

        let catalog = ctx.into_catalog();
        let (key, story) = catalog.iter().next().unwrap();
        assert_eq!(key.to_string(), "Theme/dark");
        assert_eq!(
            story.render,
            RenderDescriptor::Text {
                template: "storyshots".to_string()
            }
        );
    }

    #[test]
    fn test_bundle_returns_catalog_without_touching_context() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(tmp.path());
        let catalog = ctx
            .evaluate_bundle(
                r#"{"stories": [{"kind": "Button", "stories": [{"name": "primary", "text": "<b/>"}]}]}"#,
                &ModuleOrigin::new(tmp.path().join("bundle.json"), tmp.path()),
            )
            .unwrap();
        assert_eq!(ids(&catalog), vec!["Button/primary"]);
        assert_eq!(ctx.registered(), 0);
    }

    #[test]
    fn test_bundle_must_be_self_contained() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(tmp.path());
        let err = ctx
            .evaluate_bundle(
                "require: [./config]\n",
                &ModuleOrigin::new("bundle.yaml", tmp.path()),
            )
            .unwrap_err();
        assert!(matches!(err, LoadError::Bundle(_)));
    }
}
