//! Bundler strategy: build the config with the project's bundler, then
//! evaluate the bundle for its catalog

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use storyshots_common::{LoadError, StoryCatalog, CONFIG_ENTRY};

use super::CatalogLoader;
use crate::channel::AddonChannel;
use crate::sandbox::{ExecutionContext, ModuleOrigin};
use crate::transform::SourceTransform;

/// Bundler configuration file inside the config dir
pub const BUNDLER_CONFIG_FILE: &str = "bundler.yaml";

/// File name the bundler is asked to write
const BUNDLE_FILE: &str = "bundle.json";

/// The project's own bundler settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundlerConfig {
    /// Program and arguments; `{entry}` and `{output}` are substituted
    pub command: Vec<String>,

    /// Entry module, relative to the config dir
    #[serde(default)]
    pub entry: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl BundlerConfig {
    /// Read `bundler.yaml` from the config dir
    pub fn load(config_dir: &Path) -> Result<Self, LoadError> {
        let path = config_dir.join(BUNDLER_CONFIG_FILE);
        if !path.is_file() {
            return Err(LoadError::ConfigNotFound(path));
        }
        let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|source| LoadError::Parse { path, source })?;
        if config.command.is_empty() {
            return Err(LoadError::Bundle(format!(
                "{} declares an empty command",
                BUNDLER_CONFIG_FILE
            )));
        }
        Ok(config)
    }

    /// Adapt the project settings for a server-side build writing to `output`
    fn tweak(&self, config_dir: &Path, output: &Path) -> BundleInvocation {
        let entry = config_dir.join(
            self.entry
                .clone()
                .unwrap_or_else(|| PathBuf::from(CONFIG_ENTRY)),
        );
        let substitute = |arg: &String| {
            arg.replace("{entry}", &entry.to_string_lossy())
                .replace("{output}", &output.to_string_lossy())
        };

        let mut env = self.env.clone();
        if !env.contains_key("NODE_ENV") && std::env::var_os("NODE_ENV").is_none() {
            env.insert("NODE_ENV".to_string(), "development".to_string());
        }
        env.insert("STORYSHOTS_TARGET".to_string(), "server".to_string());
        env.insert(
            "STORYSHOTS_ENTRY".to_string(),
            entry.to_string_lossy().into_owned(),
        );
        env.insert(
            "STORYSHOTS_BUNDLE_OUT".to_string(),
            output.to_string_lossy().into_owned(),
        );

        BundleInvocation {
            program: substitute(&self.command[0]),
            args: self.command[1..].iter().map(substitute).collect(),
            env,
        }
    }
}

#[derive(Debug)]
struct BundleInvocation {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

/// Runs the project's bundler and evaluates its output
pub struct BundlerLoader {
    config_dir: PathBuf,
    entry: PathBuf,
    config: BundlerConfig,
    transform: Arc<dyn SourceTransform>,
    polyfills: Option<PathBuf>,
}

impl BundlerLoader {
    pub fn new(config_dir: &Path, config: BundlerConfig, transform: Arc<dyn SourceTransform>) -> Self {
        let config_dir = std::fs::canonicalize(config_dir).unwrap_or_else(|_| config_dir.to_path_buf());
        let entry = config_dir.join(
            config
                .entry
                .clone()
                .unwrap_or_else(|| PathBuf::from(CONFIG_ENTRY)),
        );
        Self {
            config_dir,
            entry,
            config,
            transform,
            polyfills: None,
        }
    }

    pub fn with_polyfills(mut self, polyfills: Option<PathBuf>) -> Self {
        self.polyfills = polyfills;
        self
    }

    async fn bundle(&self, output: &Path) -> Result<String, LoadError> {
        let invocation = self.config.tweak(&self.config_dir, output);
        info!("Bundling {} with {}", self.entry.display(), invocation.program);
        debug!("bundler invocation: {:?}", invocation);

        let result = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(&invocation.env)
            .current_dir(&self.config_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                LoadError::Bundle(format!("cannot spawn '{}': {}", invocation.program, e))
            })?;

        if !result.status.success() {
            return Err(LoadError::Bundle(format!(
                "'{}' exited with {}: {}",
                invocation.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        tokio::fs::read_to_string(output).await.map_err(|e| {
            LoadError::Bundle(format!(
                "no bundle produced at {}: {}",
                output.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl CatalogLoader for BundlerLoader {
    fn strategy(&self) -> &'static str {
        "bundler"
    }

    fn entry(&self) -> &Path {
        &self.entry
    }

    async fn load(&self, channel: AddonChannel) -> Result<StoryCatalog, LoadError> {
        let out_dir = tempfile::Builder::new()
            .prefix("storyshots-bundle-")
            .tempdir()
            .map_err(|e| LoadError::Bundle(format!("cannot create output dir: {}", e)))?;
        let output = out_dir.path().join(BUNDLE_FILE);

        let bundle = self.bundle(&output).await?;

        // Polyfills are read from disk, so evaluation stays off the executor
        let config_dir = self.config_dir.clone();
        let polyfills = self.polyfills.clone();
        let transform = Arc::clone(&self.transform);
        let catalog = tokio::task::spawn_blocking(move || {
            evaluate_bundle(
                &bundle,
                &output,
                &config_dir,
                polyfills.as_deref(),
                transform,
                channel,
            )
        })
        .await
        .map_err(|e| LoadError::Aborted(e.to_string()))?;

        drop(out_dir);
        catalog
    }
}

/// Evaluate a built bundle with the given polyfills and return its catalog
pub fn evaluate_bundle(
    bundle: &str,
    bundle_path: &Path,
    config_dir: &Path,
    polyfills: Option<&Path>,
    transform: Arc<dyn SourceTransform>,
    channel: AddonChannel,
) -> Result<StoryCatalog, LoadError> {
    let mut ctx = ExecutionContext::new(config_dir, transform).with_channel(channel);
    if let Some(polyfills) = polyfills {
        ctx.require(&polyfills.to_string_lossy(), config_dir)?;
    }
    ctx.evaluate_bundle(bundle, &ModuleOrigin::new(bundle_path, config_dir))
}
