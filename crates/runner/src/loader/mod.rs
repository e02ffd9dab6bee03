//! Story catalog acquisition
//!
//! Two strategies implement [`CatalogLoader`]:
//!
//! - [`DirectLoader`] transforms `config.yaml` in process and evaluates it in a
//!   fresh [`ExecutionContext`](crate::sandbox::ExecutionContext); the catalog
//!   is whatever the evaluated modules registered.
//! - [`BundlerLoader`] runs the project's bundler command, then evaluates the
//!   produced bundle, which yields the catalog as a value.
//!
//! The strategy is picked once at startup by [`build_loader`]; callers only see
//! a [`StoryCatalog`].

mod bundler;
mod direct;

pub use bundler::{evaluate_bundle, BundlerConfig, BundlerLoader, BUNDLER_CONFIG_FILE};
pub use direct::DirectLoader;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use storyshots_common::{LoadError, StoryCatalog};

use crate::channel::AddonChannel;
use crate::config::{LoaderKind, StoryshotsConfig};
use crate::transform::{Interpolator, Loaders, TransformConfig};

/// A way of obtaining the story catalog from a project
#[async_trait]
pub trait CatalogLoader: Send + Sync {
    /// Short strategy name for logs
    fn strategy(&self) -> &'static str;

    /// The configuration entry the catalog is loaded from
    fn entry(&self) -> &Path;

    /// Load the catalog. Addon events go to `channel`.
    async fn load(&self, channel: AddonChannel) -> Result<StoryCatalog, LoadError>;
}

/// Install a fresh addon channel and load the catalog through `loader`.
///
/// A catalog without stories is a load error.
pub async fn load_catalog(loader: &dyn CatalogLoader) -> Result<StoryCatalog, LoadError> {
    let channel = AddonChannel::new();
    let catalog = loader.load(channel.clone()).await?;
    if catalog.is_empty() {
        return Err(LoadError::NoStories(loader.entry().to_path_buf()));
    }
    info!(
        "Loaded {} story(ies) in {} group(s) via {} loader ({} addon event(s))",
        catalog.len(),
        catalog.groups().len(),
        loader.strategy(),
        channel.len()
    );
    Ok(catalog)
}

/// Build the loader selected by the configuration
pub fn build_loader(config: &StoryshotsConfig) -> Result<Box<dyn CatalogLoader>, LoadError> {
    let config_dir = config.config_dir.as_path();
    let transform = Arc::new(Interpolator::new(TransformConfig::load(config_dir)?));
    let polyfills = config.loader.polyfills.clone();

    match config.loader.kind {
        LoaderKind::Direct => {
            let loaders = match &config.loader.loaders {
                Some(path) => Loaders::load(path)?,
                None => Loaders::default(),
            };
            Ok(Box::new(
                DirectLoader::new(config_dir, transform)
                    .with_loaders(loaders)
                    .with_polyfills(polyfills),
            ))
        }
        LoaderKind::Bundler => {
            let bundler = BundlerConfig::load(config_dir)?;
            Ok(Box::new(
                BundlerLoader::new(config_dir, bundler, transform).with_polyfills(polyfills),
            ))
        }
    }
}
