//! Source transformation applied before a module is evaluated

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use storyshots_common::LoadError;

/// File name of the optional transform configuration inside the config dir
pub const TRANSFORM_CONFIG_FILE: &str = "transform.yaml";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"));

/// Turns raw module text into evaluable module text
pub trait SourceTransform: Send + Sync {
    fn transform(
        &self,
        path: &Path,
        source: &str,
        globals: &BTreeMap<String, String>,
    ) -> Result<String, LoadError>;
}

/// Settings read from `transform.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformConfig {
    /// Values available to `${NAME}` placeholders
    #[serde(default)]
    pub define: BTreeMap<String, String>,

    /// Fall back to the process environment for unknown names
    #[serde(default)]
    pub env: bool,
}

impl TransformConfig {
    /// Read `transform.yaml` from the config dir, or use defaults when absent
    pub fn load(config_dir: &Path) -> Result<Self, LoadError> {
        let path = config_dir.join(TRANSFORM_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
            path: path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| LoadError::Parse { path, source })
    }
}

/// `${NAME}` interpolation over defines, context globals and optionally the environment
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    config: TransformConfig,
}

impl Interpolator {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    fn lookup(&self, name: &str, globals: &BTreeMap<String, String>) -> Option<String> {
        self.config
            .define
            .get(name)
            .or_else(|| globals.get(name))
            .cloned()
            .or_else(|| {
                if self.config.env {
                    std::env::var(name).ok()
                } else {
                    None
                }
            })
    }
}

impl SourceTransform for Interpolator {
    fn transform(
        &self,
        path: &Path,
        source: &str,
        globals: &BTreeMap<String, String>,
    ) -> Result<String, LoadError> {
        let mut missing: Option<String> = None;
        let output = PLACEHOLDER.replace_all(source, |caps: &Captures| {
            let name = &caps[1];
            match self.lookup(name, globals) {
                Some(value) => value,
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        if let Some(name) = missing {
            return Err(LoadError::Transform {
                path: path.to_path_buf(),
                reason: format!("undefined variable '{}'", name),
            });
        }
        Ok(output.into_owned())
    }
}

/// Custom loaders keyed by file extension.
///
/// A loader is a command; the module path is appended as the last argument
/// and its stdout becomes the module source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Loaders(BTreeMap<String, Vec<String>>);

impl Loaders {
    /// Read a loaders file mapping extensions to commands
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, Vec<String>> = serde_yaml::from_str(&content)
            .map_err(|source| LoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut loaders = BTreeMap::new();
        for (ext, command) in raw {
            let ext = ext.trim_start_matches('.').to_string();
            if command.is_empty() {
                return Err(LoadError::Loader {
                    extension: ext,
                    path: path.to_path_buf(),
                    reason: "empty loader command".to_string(),
                });
            }
            loaders.insert(ext, command);
        }
        Ok(Self(loaders))
    }

    pub fn insert(&mut self, extension: &str, command: Vec<String>) {
        self.0
            .insert(extension.trim_start_matches('.').to_string(), command);
    }

    /// Extensions with a registered loader
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn command_for(&self, path: &Path) -> Option<(&str, &[String])> {
        let ext = path.extension()?.to_str()?;
        self.0
            .get_key_value(ext)
            .map(|(ext, command)| (ext.as_str(), command.as_slice()))
    }

    /// Run the loader registered for `path`, if any.
    pub fn run(&self, path: &Path) -> Result<Option<String>, LoadError> {
        let Some((ext, command)) = self.command_for(path) else {
            return Ok(None);
        };
        debug!("loading {} with {:?}", path.display(), command);

        let loader_error = |reason: String| LoadError::Loader {
            extension: ext.to_string(),
            path: path.to_path_buf(),
            reason,
        };

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]).arg(path).stdin(Stdio::null());
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        let output = cmd
            .output()
            .map_err(|e| loader_error(format!("cannot spawn '{}': {}", command[0], e)))?;

        if !output.status.success() {
            return Err(loader_error(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map(Some)
            .map_err(|_| loader_error("output is not valid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn globals(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_interpolates_defines_before_globals() {
        let mut config = TransformConfig::default();
        config.define.insert("theme".into(), "dark".into());
        let transform = Interpolator::new(config);

        let out = transform
            .transform(
                Path::new("config.yaml"),
                "a: ${theme}\nb: ${user_agent}",
                &globals(&[("theme", "light"), ("user_agent", "storyshots")]),
            )
            .unwrap();
        assert_eq!(out, "a: dark\nb: storyshots");
    }

    #[test]
    fn test_undefined_variable_fails() {
        let err = Interpolator::default()
            .transform(Path::new("stories.yaml"), "x: ${nope}", &BTreeMap::new())
            .unwrap_err();
        match err {
            LoadError::Transform { path, reason } => {
                assert_eq!(path, PathBuf::from("stories.yaml"));
                assert!(reason.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_text_without_placeholders_is_untouched() {
        let source = "stories: []\nprice: $5 {not a var}";
        let out = Interpolator::default()
            .transform(Path::new("x.yaml"), source, &BTreeMap::new())
            .unwrap();
        assert_eq!(out, source);
    }

    #[test]
    fn test_transform_config_defaults_when_missing() {
        let tmp = TempDir::new().unwrap();
        let config = TransformConfig::load(tmp.path()).unwrap();
        assert!(config.define.is_empty());
        assert!(!config.env);
    }

    #[test]
    fn test_loaders_normalize_extensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("loaders.yaml");
        std::fs::write(&path, ".md: [cat]\ntxt: [cat]\n").unwrap();

        let loaders = Loaders::load(&path).unwrap();
        let exts: Vec<&str> = loaders.extensions().collect();
        assert_eq!(exts, vec!["md", "txt"]);
    }

    #[test]
    fn test_loaders_reject_empty_command() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("loaders.yaml");
        std::fs::write(&path, "md: []\n").unwrap();
        assert!(matches!(
            Loaders::load(&path),
            Err(LoadError::Loader { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_loader_output_becomes_source() {
        let tmp = TempDir::new().unwrap();
        let module = tmp.path().join("button.story");
        std::fs::write(&module, "stories: []\n").unwrap();

        let mut loaders = Loaders::default();
        loaders.insert(".story", vec!["cat".to_string()]);

        assert_eq!(loaders.run(&module).unwrap().as_deref(), Some("stories: []\n"));
        assert_eq!(loaders.run(&tmp.path().join("plain.yaml")).unwrap(), None);
    }
}
