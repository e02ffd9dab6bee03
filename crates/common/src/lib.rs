//! Storyshots Common Library
//!
//! Story catalog data model, story selection and the error taxonomy shared
//! by the runner and the CLI.

pub mod error;
pub mod filter;
pub mod types;

// Re-export commonly used types
pub use error::{Error, LoadError, RenderError, Result};
pub use filter::{FilterSpec, RunnableSet};
pub use types::*;

/// Storyshots version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration directory of a story project
pub const DEFAULT_CONFIG_DIR: &str = ".storybook";

/// Entry module inside the configuration directory
pub const CONFIG_ENTRY: &str = "config.yaml";

/// Default snapshot file extension
pub const DEFAULT_SNAPSHOT_EXTENSION: &str = ".shot";

/// Default snapshot directory for a configuration directory
pub fn default_snapshot_dir(config_dir: &std::path::Path) -> std::path::PathBuf {
    config_dir.join("__storyshots__")
}
