use crate::{ClustererError, ProjectId, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Glob-style pattern normalizing transaction names, e.g. `/users/*/**`.
///
/// `*` stands for exactly one path segment; a trailing `**` matches whatever
/// follows, including nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplacementRule(String);

impl ReplacementRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, name: &str) -> bool {
        self.replace(name).is_some()
    }

    /// Normalize `name`, or `None` when the rule does not match it
    pub fn apply(&self, name: &str) -> Option<String> {
        self.replace(name)
    }

    fn replace(&self, name: &str) -> Option<String> {
        let pattern: Vec<&str> = segments(&self.0).collect();
        let mut input = segments(name);
        let mut output = Vec::with_capacity(pattern.len());

        for (i, expected) in pattern.iter().enumerate() {
            match *expected {
                "**" if i == pattern.len() - 1 => {
                    output.extend(input.by_ref());
                    break;
                }
                "*" => {
                    input.next()?;
                    output.push("*");
                }
                literal => {
                    if input.next()? != literal {
                        return None;
                    }
                    output.push(literal);
                }
            }
        }

        if input.next().is_some() {
            return None;
        }

        let mut replaced = format!("/{}", output.join("/"));
        if name.ends_with('/') && !output.is_empty() {
            replaced.push('/');
        }
        Some(replaced)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

impl fmt::Display for ReplacementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplacementRule {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

impl From<String> for ReplacementRule {
    fn from(pattern: String) -> Self {
        Self(pattern)
    }
}

impl PartialEq<str> for ReplacementRule {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ReplacementRule {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Per-project hash of rule → timestamp string, e.g. a redis hash.
pub trait RuleBackingStore: Send + Sync {
    fn read(&self, project: ProjectId) -> Result<HashMap<String, String>>;
    /// Upsert the given fields, leaving all other fields untouched
    fn write(&self, project: ProjectId, fields: HashMap<String, String>) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryRuleStore {
    hashes: DashMap<ProjectId, HashMap<String, String>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleBackingStore for MemoryRuleStore {
    fn read(&self, project: ProjectId) -> Result<HashMap<String, String>> {
        Ok(self
            .hashes
            .get(&project)
            .map(|hash| hash.clone())
            .unwrap_or_default())
    }

    fn write(&self, project: ProjectId, fields: HashMap<String, String>) -> Result<()> {
        self.hashes.entry(project).or_default().extend(fields);
        Ok(())
    }
}

/// Rules discovered per project, each stamped with when it was last seen.
#[derive(Clone)]
pub struct RuleStore {
    backend: Arc<dyn RuleBackingStore>,
}

impl RuleStore {
    pub fn new(backend: Arc<dyn RuleBackingStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRuleStore::new()))
    }

    /// Stamp `rules` with `now`; rules not mentioned keep their timestamps.
    pub fn update_rules(
        &self,
        project: ProjectId,
        rules: &[ReplacementRule],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }

        let timestamp = now.timestamp().to_string();
        let fields = rules
            .iter()
            .map(|rule| (rule.to_string(), timestamp.clone()))
            .collect();
        self.backend.write(project, fields)?;

        info!("Stored {} rules for project {}", rules.len(), project);
        Ok(())
    }

    /// Rule → Unix timestamp of its last update
    pub fn get_rules(&self, project: ProjectId) -> Result<BTreeMap<ReplacementRule, i64>> {
        let raw = self.backend.read(project)?;
        debug!("Read {} rules for project {}", raw.len(), project);

        raw.into_iter()
            .map(|(rule, value)| match value.parse::<i64>() {
                Ok(timestamp) => Ok((ReplacementRule(rule), timestamp)),
                Err(_) => Err(ClustererError::CorruptRule { rule, value }),
            })
            .collect()
    }
}
