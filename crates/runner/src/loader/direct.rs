//! Direct strategy: transform and evaluate the config entry in process

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use storyshots_common::{LoadError, StoryCatalog, CONFIG_ENTRY};

use super::CatalogLoader;
use crate::channel::AddonChannel;
use crate::sandbox::{ExecutionContext, ModuleOrigin};
use crate::transform::{Loaders, SourceTransform};

/// Loads `config.yaml` through the source transform into a fresh context
#[derive(Clone)]
pub struct DirectLoader {
    config_dir: PathBuf,
    entry: PathBuf,
    transform: Arc<dyn SourceTransform>,
    loaders: Loaders,
    polyfills: Option<PathBuf>,
}

impl DirectLoader {
    pub fn new(config_dir: &Path, transform: Arc<dyn SourceTransform>) -> Self {
        let config_dir = std::fs::canonicalize(config_dir).unwrap_or_else(|_| config_dir.to_path_buf());
        Self {
            entry: config_dir.join(CONFIG_ENTRY),
            config_dir,
            transform,
            loaders: Loaders::default(),
            polyfills: None,
        }
    }

    pub fn with_loaders(mut self, loaders: Loaders) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn with_polyfills(mut self, polyfills: Option<PathBuf>) -> Self {
        self.polyfills = polyfills;
        self
    }

    /// One synchronous load in a context that is dropped afterwards
    pub fn load_blocking(&self, channel: AddonChannel) -> Result<StoryCatalog, LoadError> {
        if !self.entry.is_file() {
            return Err(LoadError::ConfigNotFound(self.entry.clone()));
        }

        let mut ctx = ExecutionContext::new(&self.config_dir, Arc::clone(&self.transform))
            .with_loaders(self.loaders.clone())
            .with_channel(channel);

        if let Some(polyfills) = &self.polyfills {
            debug!("evaluating polyfills {}", polyfills.display());
            ctx.require(&polyfills.to_string_lossy(), &self.config_dir)?;
        }

        ctx.mark_evaluated(&self.entry);
        let raw = std::fs::read_to_string(&self.entry).map_err(|source| LoadError::Read {
            path: self.entry.clone(),
            source,
        })?;
        let source = self.transform.transform(&self.entry, &raw, ctx.globals())?;
        ctx.evaluate(&source, &ModuleOrigin::new(&self.entry, &self.config_dir))?;

        debug!(
            "direct load evaluated {} module(s) including the entry",
            ctx.cached_modules()
        );
        Ok(ctx.into_catalog())
    }
}

#[async_trait]
impl CatalogLoader for DirectLoader {
    fn strategy(&self) -> &'static str {
        "direct"
    }

    fn entry(&self) -> &Path {
        &self.entry
    }

    async fn load(&self, channel: AddonChannel) -> Result<StoryCatalog, LoadError> {
        let loader = self.clone();
        tokio::task::spawn_blocking(move || loader.load_blocking(channel))
            .await
            .map_err(|e| LoadError::Aborted(e.to_string()))?
    }
}
