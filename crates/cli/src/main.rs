//! Storyshots CLI - Main Entry Point
//!
//! Renders every story of a project and compares the output against
//! recorded snapshots, once or whenever project files change.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

mod output;

use output::OutputFormat;
use storyshots_runner::{LoaderKind, Pipeline, StoryshotsConfig, WatchController};

/// Snapshot testing for story catalogs
#[derive(Parser, Debug)]
#[command(name = "storyshots")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding config.yaml
    #[arg(short, long, default_value = storyshots_common::DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Overwrite snapshots that no longer match
    #[arg(short, long)]
    update: bool,

    /// Review each differing snapshot before overwriting it
    #[arg(short = 'i', long = "update-interactive")]
    interactive: bool,

    /// Only run stories whose "group/story" matches this pattern
    #[arg(short, long)]
    grep: Option<String>,

    /// Skip stories whose "group/story" matches this pattern
    #[arg(short = 'x', long)]
    exclude: Option<String>,

    /// Re-run whenever project files change
    #[arg(short, long)]
    watch: bool,

    /// Snapshot directory (default: <config-dir>/__storyshots__)
    #[arg(long)]
    storyshot_dir: Option<PathBuf>,

    /// Snapshot file extension
    #[arg(long)]
    extension: Option<String>,

    /// Module evaluated before the configuration
    #[arg(long)]
    polyfills: Option<PathBuf>,

    /// YAML map from file extension to a command producing module source
    #[arg(long)]
    loaders: Option<PathBuf>,

    /// Build the configuration with the project's bundler (bundler.yaml)
    #[arg(long, conflicts_with = "loaders")]
    bundler: bool,

    /// Never create missing snapshots
    #[arg(
        long,
        env = "CI",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    ci: bool,

    /// Write the run result as JSON to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Quiet period in watch mode, in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Output format
    #[arg(long, default_value = "table")]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Settings file values, overridden by flags
    fn config(&self) -> storyshots_common::Result<StoryshotsConfig> {
        let mut config = StoryshotsConfig::load(&self.config_dir)?;

        config.update |= self.update;
        config.interactive |= self.interactive;
        config.ci |= self.ci;
        config.watch.enabled |= self.watch;
        if self.grep.is_some() {
            config.grep = self.grep.clone();
        }
        if self.exclude.is_some() {
            config.exclude = self.exclude.clone();
        }
        if self.output.is_some() {
            config.output = self.output.clone();
        }
        if self.storyshot_dir.is_some() {
            config.snapshots.dir = self.storyshot_dir.clone();
        }
        if let Some(extension) = &self.extension {
            config.snapshots.extension = extension.clone();
        }
        if self.polyfills.is_some() {
            config.loader.polyfills = self.polyfills.clone();
        }
        if self.loaders.is_some() {
            config.loader.loaders = self.loaders.clone();
        }
        if self.bundler {
            config.loader.kind = LoaderKind::Bundler;
        }
        if let Some(debounce_ms) = self.debounce_ms {
            config.watch.debounce_ms = debounce_ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config()?;
    let mut pipeline = Pipeline::from_config(&config)?;

    if config.watch.enabled {
        let controller = WatchController::from_config(std::env::current_dir()?, &config);
        controller
            .run(&mut pipeline, |report| {
                output::print_cycle(report, cli.format, true)
            })
            .await?;
        return Ok(());
    }

    let report = pipeline.run_cycle().await;
    output::print_cycle(&report, cli.format, false);
    std::process::exit(report.verdict.exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_settings_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("storyshots.toml"),
            "grep = \"^Card/\"\n[snapshots]\nextension = \".snap\"\n",
        )
        .unwrap();
        let dir = tmp.path().to_string_lossy().to_string();

        let cli = Cli::parse_from(["storyshots", "-c", &dir, "-g", "^Button/", "-u"]);
        let config = cli.config().unwrap();
        assert_eq!(config.grep.as_deref(), Some("^Button/"));
        assert_eq!(config.snapshots.extension, ".snap");
        assert!(config.update);
    }

    #[test]
    fn test_bundler_conflicts_with_loaders() {
        let parsed = Cli::try_parse_from(["storyshots", "--bundler", "--loaders", "loaders.yaml"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ci_env_accepts_numeric_values() {
        std::env::set_var("CI", "1");
        let enabled = Cli::try_parse_from(["storyshots"]).map(|cli| cli.ci);
        std::env::set_var("CI", "0");
        let disabled = Cli::try_parse_from(["storyshots"]).map(|cli| cli.ci);
        std::env::remove_var("CI");

        assert!(enabled.unwrap());
        assert!(!disabled.unwrap());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["storyshots"]);
        assert_eq!(cli.config_dir, PathBuf::from(".storybook"));
        assert_eq!(cli.format, OutputFormat::Table);
        assert!(!cli.watch);
    }
}
