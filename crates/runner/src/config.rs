//! Runner configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use storyshots_common::{
    default_snapshot_dir, Error, Result, CONFIG_ENTRY, DEFAULT_CONFIG_DIR,
    DEFAULT_SNAPSHOT_EXTENSION,
};

/// Optional settings file inside the config dir
pub const SETTINGS_FILE: &str = "storyshots.toml";

/// Storyshots configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryshotsConfig {
    /// Directory holding `config.yaml`
    pub config_dir: PathBuf,

    /// Only run stories whose `group/story` matches
    pub grep: Option<String>,

    /// Skip stories whose `group/story` matches
    pub exclude: Option<String>,

    /// Overwrite differing snapshots
    pub update: bool,

    /// Ask before overwriting each differing snapshot
    pub interactive: bool,

    /// Never create missing snapshots
    pub ci: bool,

    /// Write the run result as JSON to this file
    pub output: Option<PathBuf>,

    /// Catalog loader configuration
    pub loader: LoaderConfig,

    /// Snapshot storage configuration
    pub snapshots: SnapshotConfig,

    /// Watch mode configuration
    pub watch: WatchConfig,
}

impl Default for StoryshotsConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            grep: None,
            exclude: None,
            update: false,
            interactive: false,
            ci: false,
            output: None,
            loader: LoaderConfig::default(),
            snapshots: SnapshotConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Which strategy loads the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    #[default]
    Direct,
    Bundler,
}

/// Catalog loader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub kind: LoaderKind,

    /// Extension-to-command loaders file (direct strategy only)
    pub loaders: Option<PathBuf>,

    /// Module evaluated before the config entry
    pub polyfills: Option<PathBuf>,
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Defaults to `<config_dir>/__storyshots__`
    pub dir: Option<PathBuf>,

    pub extension: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: None,
            extension: DEFAULT_SNAPSHOT_EXTENSION.to_string(),
        }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,

    /// Quiet period collecting a burst of changes into one cycle
    pub debounce_ms: u64,

    /// Path components that never trigger a cycle
    pub ignore: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 200,
            ignore: vec![
                "node_modules".to_string(),
                "target".to_string(),
                ".git".to_string(),
            ],
        }
    }
}

impl StoryshotsConfig {
    /// Defaults for a given config dir
    pub fn for_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Default::default()
        }
    }

    /// Load `storyshots.toml` from the config dir, or defaults when absent
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::for_config_dir(config_dir));
        }
        let content = std::fs::read_to_string(&path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.config_dir = config_dir.to_path_buf();
        Ok(config)
    }

    /// Reject option combinations that cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.loader.kind == LoaderKind::Bundler && self.loader.loaders.is_some() {
            return Err(Error::InvalidConfig(
                "custom loaders cannot be combined with the bundler strategy".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the configuration entry module
    pub fn entry_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_ENTRY)
    }

    /// Effective snapshot directory
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshots
            .dir
            .clone()
            .unwrap_or_else(|| default_snapshot_dir(&self.config_dir))
    }
}
