//! Story rendering

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use storyshots_common::{CommandSpec, RenderDescriptor, RenderError, Story, StoryKey};

static PARAMETER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("valid parameter regex")
});

/// Turns a story into the value compared against its snapshot
#[async_trait]
pub trait StoryRenderer: Send + Sync {
    async fn render(&self, key: &StoryKey, story: &Story) -> Result<String, RenderError>;
}

/// Renders `text` templates in process and `command` stories as subprocesses
#[derive(Debug, Clone, Default)]
pub struct DefaultRenderer;

#[async_trait]
impl StoryRenderer for DefaultRenderer {
    async fn render(&self, key: &StoryKey, story: &Story) -> Result<String, RenderError> {
        match &story.render {
            RenderDescriptor::Text { template } => fill_template(template, &story.parameters),
            RenderDescriptor::Command(spec) => run_command(key, spec, &story.parameters).await,
        }
    }
}

/// Substitute `{{name}}` placeholders from story parameters.
///
/// String values are inserted verbatim, other values as compact JSON.
pub fn fill_template(
    template: &str,
    parameters: &BTreeMap<String, serde_json::Value>,
) -> Result<String, RenderError> {
    let mut unknown: Option<String> = None;
    let output = PARAMETER.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match parameters.get(name) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => {
                unknown.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match unknown {
        Some(name) => Err(RenderError::UnknownParameter(name)),
        None => Ok(output.into_owned()),
    }
}

async fn run_command(
    key: &StoryKey,
    spec: &CommandSpec,
    parameters: &BTreeMap<String, serde_json::Value>,
) -> Result<String, RenderError> {
    let args = spec
        .args
        .iter()
        .map(|arg| fill_template(arg, parameters))
        .collect::<Result<Vec<_>, _>>()?;
    let parameters_json = serde_json::to_string(parameters).unwrap_or_else(|_| "{}".to_string());

    debug!("rendering {} with {} {:?}", key, spec.program, args);

    let mut cmd = Command::new(&spec.program);
    cmd.args(&args)
        .envs(&spec.env)
        .env("STORYSHOTS_STORY", key.to_string())
        .env("STORYSHOTS_PARAMETERS", parameters_json)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let output = cmd.output().await.map_err(|source| RenderError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    if !output.status.success() {
        return Err(RenderError::CommandFailed {
            program: spec.program.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|_| RenderError::InvalidOutput)
}
