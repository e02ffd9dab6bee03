//! Core types for storyshots

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Fully qualified story identifier, displayed as `group/story`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoryKey {
    pub group: String,
    pub name: String,
}

impl StoryKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// How a story produces its output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderDescriptor {
    /// Template with `{{param}}` placeholders
    Text { template: String },

    /// External process whose stdout is the output
    Command(CommandSpec),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// A single render case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub name: String,
    pub render: RenderDescriptor,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Stories registered under one component identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryGroup {
    pub kind: String,
    pub stories: Vec<Story>,
}

/// Ordered collection of story groups.
///
/// Groups keep first-registration order and stories keep insertion order
/// within their group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoryCatalog {
    groups: Vec<StoryGroup>,
}

impl StoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a story to its group, creating the group on first use.
    ///
    /// Returns the story back if the group already holds that name.
    pub fn insert(&mut self, kind: &str, story: Story) -> Result<(), Story> {
        match self.groups.iter_mut().find(|g| g.kind == kind) {
            Some(group) => {
                if group.stories.iter().any(|s| s.name == story.name) {
                    return Err(story);
                }
                group.stories.push(story);
            }
            None => self.groups.push(StoryGroup {
                kind: kind.to_string(),
                stories: vec![story],
            }),
        }
        Ok(())
    }

    pub fn groups(&self) -> &[StoryGroup] {
        &self.groups
    }

    pub fn group(&self, kind: &str) -> Option<&StoryGroup> {
        self.groups.iter().find(|g| g.kind == kind)
    }

    /// Iterate every story in catalog order with its key.
    pub fn iter(&self) -> impl Iterator<Item = (StoryKey, &Story)> {
        self.groups.iter().flat_map(|group| {
            group
                .stories
                .iter()
                .map(move |story| (StoryKey::new(&group.kind, &story.name), story))
        })
    }

    pub fn keys(&self) -> Vec<StoryKey> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// Total number of stories
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.stories.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
