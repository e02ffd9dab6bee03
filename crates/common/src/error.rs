//! Error types for storyshots

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the storyshots Error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Invalid story pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Watcher error: {0}")]
    Watch(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to acquire the story catalog. Fatal to the current cycle.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Configuration not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Cannot resolve '{specifier}' from {}", .from.display())]
    ModuleNotFound { specifier: String, from: PathBuf },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Transform failed for {}: {reason}", .path.display())]
    Transform { path: PathBuf, reason: String },

    #[error("Loader for '.{extension}' failed on {}: {reason}", .path.display())]
    Loader {
        extension: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Bundler failed: {0}")]
    Bundle(String),

    #[error("Invalid story '{kind}/{name}' in {}: {reason}", .path.display())]
    InvalidStory {
        kind: String,
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Story '{kind}/{name}' registered twice")]
    DuplicateStory { kind: String, name: String },

    #[error("Addon channel is not installed; cannot emit '{0}'")]
    ChannelMissing(String),

    #[error("No stories were registered by {}", .0.display())]
    NoStories(PathBuf),

    #[error("Evaluation aborted: {0}")]
    Aborted(String),
}

/// Failure to render a single story. Isolated to that story.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Unknown template parameter '{0}'")]
    UnknownParameter(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Render output is not valid UTF-8")]
    InvalidOutput,

    #[error("Renderer panicked: {0}")]
    Panicked(String),
}
