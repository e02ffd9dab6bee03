//! Include/exclude selection over a story catalog

use regex::Regex;
use std::collections::BTreeSet;

use crate::error::Result;
use crate::types::{StoryCatalog, StoryKey};

/// Include and exclude predicates, matched against `group/story`.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl FilterSpec {
    /// Compile the optional patterns. Empty or all-blank strings count as
    /// absent; anything else is compiled as written.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Whether a story with this key is runnable
    pub fn accepts(&self, key: &StoryKey) -> bool {
        let id = key.to_string();
        let included = self.include.as_ref().map_or(true, |re| re.is_match(&id));
        let excluded = self.exclude.as_ref().map_or(false, |re| re.is_match(&id));
        included && !excluded
    }

    /// Select the runnable subset of `catalog`, preserving order.
    pub fn apply(&self, catalog: &StoryCatalog) -> RunnableSet {
        let mut runnable = StoryCatalog::new();
        let mut skipped = BTreeSet::new();
        for (key, story) in catalog.iter() {
            if self.accepts(&key) {
                // Keys are unique in the source catalog, so insert cannot collide.
                let _ = runnable.insert(&key.group, story.clone());
            } else {
                skipped.insert(key);
            }
        }
        RunnableSet {
            catalog: runnable,
            skipped,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern {
        Some(p) if !p.trim().is_empty() => Ok(Some(Regex::new(p)?)),
        _ => Ok(None),
    }
}

/// Stories selected for a run, plus the keys the filter left out.
#[derive(Debug, Clone, Default)]
pub struct RunnableSet {
    catalog: StoryCatalog,
    skipped: BTreeSet<StoryKey>,
}

impl RunnableSet {
    pub fn catalog(&self) -> &StoryCatalog {
        &self.catalog
    }

    /// Keys present in the source catalog but filtered out
    pub fn skipped(&self) -> &BTreeSet<StoryKey> {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}
